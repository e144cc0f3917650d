use tracing::info;

use crate::error::{ReviewError, ReviewResult};
use crate::models::ImageRecord;
use crate::store::RecordStore;

const DEFAULT_FILE_NAME: &str = "image.jpg";

/// One row of the per-class drill-down, carrying what an explanation
/// request needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    pub image_id: String,
    pub file_name: String,
    pub confidence: f64,
    pub class_index: u32,
    pub image_base64: String,
}

impl DetailRecord {
    pub fn confidence_label(&self) -> String {
        format!("{}%", self.confidence)
    }

    /// Stored payloads are bare base64 JPEG unless they already carry a
    /// data URL prefix.
    pub fn data_url(&self) -> String {
        if self.image_base64.starts_with("data:") {
            self.image_base64.clone()
        } else {
            format!("data:image/jpeg;base64,{}", self.image_base64)
        }
    }
}

impl From<ImageRecord> for DetailRecord {
    fn from(record: ImageRecord) -> Self {
        Self {
            image_id: record.id,
            file_name: record
                .file_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
            confidence: record.confidence,
            class_index: record.class_index,
            image_base64: record.image_base64,
        }
    }
}

/// Images of `batch_id` predicted as `label`, in the store's order.
pub async fn fetch_class_details(
    store: &dyn RecordStore,
    batch_id: &str,
    label: &str,
) -> ReviewResult<Vec<DetailRecord>> {
    if batch_id.is_empty() {
        return Err(ReviewError::MissingContext("batch_id"));
    }
    if label.is_empty() {
        return Err(ReviewError::MissingContext("class_label"));
    }

    let records = store.images_with_prediction(batch_id, label).await?;
    info!(batch_id, label, images = records.len(), "loaded class details");
    Ok(records.into_iter().map(DetailRecord::from).collect())
}

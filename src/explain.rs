//! Explanation request orchestration.
//!
//! Each record moves `Idle -> Requesting -> Succeeded | Failed -> Idle`.
//! Requests for different records run in parallel; a second request for a
//! record that is already `Requesting` is refused. Results are keyed by
//! record id so callers never mix up overlays.
//!
//! A finished result stays visible until it is acknowledged or the next
//! request starts, so only in-flight requests and the latest results are
//! held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{info, warn};

use crate::details::DetailRecord;
use crate::error::{ReviewError, ReviewResult};
use crate::inference::{InferenceService, UploadFile};
use crate::models::ModelId;

const DEFAULT_MIME: &str = "image/jpeg";

/// Turns a stored payload into the file the inference service expects.
/// Accepts bare base64 or a `data:<mime>;base64,` URL.
pub fn decode_payload(image_id: &str, payload: &str, file_name: &str) -> ReviewResult<UploadFile> {
    let corrupt = |reason: String| ReviewError::CorruptPayload {
        image_id: image_id.to_string(),
        reason,
    };

    let (mime_type, data) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| corrupt("data URL has no payload".to_string()))?;
            let mime = header
                .split(';')
                .next()
                .filter(|mime| !mime.is_empty())
                .ok_or_else(|| corrupt("data URL has no MIME type".to_string()))?;
            (mime.to_string(), data)
        }
        None => (DEFAULT_MIME.to_string(), payload),
    };

    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(UploadFile {
        file_name: file_name.to_string(),
        mime_type,
        bytes,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub image_id: String,
    pub png_base64: String,
}

impl Overlay {
    pub fn png_bytes(&self) -> ReviewResult<Vec<u8>> {
        BASE64
            .decode(self.png_base64.trim())
            .map_err(|e| ReviewError::CorruptPayload {
                image_id: self.image_id.clone(),
                reason: format!("overlay: {e}"),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExplainState {
    #[default]
    Idle,
    Requesting,
    Succeeded(Overlay),
    Failed(String),
}

pub struct ExplainCoordinator {
    service: Arc<dyn InferenceService>,
    states: Mutex<HashMap<String, ExplainState>>,
}

impl ExplainCoordinator {
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        Self {
            service,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, ExplainState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, image_id: &str) -> ExplainState {
        self.states().get(image_id).cloned().unwrap_or_default()
    }

    /// Dismisses a finished result, returning the record to `Idle`.
    pub fn acknowledge(&self, image_id: &str) {
        let mut states = self.states();
        if !matches!(states.get(image_id), Some(ExplainState::Requesting)) {
            states.remove(image_id);
        }
    }

    pub async fn explain(&self, record: &DetailRecord, model: ModelId) -> ReviewResult<Overlay> {
        {
            let mut states = self.states();
            if matches!(states.get(&record.image_id), Some(ExplainState::Requesting)) {
                return Err(ReviewError::ExplanationPending(record.image_id.clone()));
            }
            states.retain(|_, state| matches!(state, ExplainState::Requesting));
            states.insert(record.image_id.clone(), ExplainState::Requesting);
        }

        let result = self.request(record, model).await;

        let next = match &result {
            Ok(overlay) => ExplainState::Succeeded(overlay.clone()),
            Err(err) => ExplainState::Failed(err.to_string()),
        };
        self.states().insert(record.image_id.clone(), next);
        result
    }

    async fn request(&self, record: &DetailRecord, model: ModelId) -> ReviewResult<Overlay> {
        let file = decode_payload(&record.image_id, &record.image_base64, &record.file_name)?;
        info!(
            image_id = %record.image_id,
            class_index = record.class_index,
            model = %model,
            "requesting explanation overlay"
        );

        match self.service.explain(file, record.class_index, model).await {
            Ok(png_base64) => Ok(Overlay {
                image_id: record.image_id.clone(),
                png_base64,
            }),
            Err(err) => {
                warn!(image_id = %record.image_id, error = %err, "explanation failed");
                Err(err.into())
            }
        }
    }
}

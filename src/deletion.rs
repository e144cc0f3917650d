//! Batch deletion as a saga over a store without cascading deletes.
//!
//! Children go first. If any child delete fails the parent is kept, so a
//! retry can find the leftovers through it.

use tracing::{info, warn};

use crate::error::ReviewResult;
use crate::store::RecordStore;

pub const CONFIRM_PROMPT: &str =
    "Are you sure you want to delete this batch? This action cannot be undone.";

#[derive(Debug, Clone, PartialEq)]
pub enum DeletionOutcome {
    /// The user declined; nothing was touched.
    Declined,
    Deleted { images_removed: usize },
    /// Children were removed but the batch document was already gone.
    ParentAlreadyAbsent { images_removed: usize },
    /// Some children could not be removed. The batch document is kept and
    /// the cleanup should be retried.
    PartiallyDeleted {
        images_removed: usize,
        failed: Vec<String>,
    },
}

impl DeletionOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            DeletionOutcome::Deleted { .. } | DeletionOutcome::ParentAlreadyAbsent { .. }
        )
    }
}

/// Asks `confirm` first; declining has no side effects. Listing the children
/// failing aborts before anything is deleted.
pub async fn delete_batch<F>(
    store: &dyn RecordStore,
    batch_id: &str,
    confirm: F,
) -> ReviewResult<DeletionOutcome>
where
    F: FnOnce(&str) -> bool,
{
    if !confirm(CONFIRM_PROMPT) {
        info!(batch_id, "batch deletion declined");
        return Ok(DeletionOutcome::Declined);
    }

    let images = store.images(batch_id).await?;
    info!(batch_id, images = images.len(), "deleting batch");

    let mut images_removed = 0;
    let mut failed = Vec::new();
    for image in &images {
        match store.delete_image(batch_id, &image.id).await {
            Ok(()) => images_removed += 1,
            Err(err) => {
                warn!(batch_id, image_id = %image.id, error = %err, "failed to delete image");
                failed.push(image.id.clone());
            }
        }
    }

    if !failed.is_empty() {
        warn!(
            batch_id,
            removed = images_removed,
            failed = failed.len(),
            "batch partially deleted; retry cleanup"
        );
        return Ok(DeletionOutcome::PartiallyDeleted {
            images_removed,
            failed,
        });
    }

    if store.delete_batch(batch_id).await? {
        info!(batch_id, images_removed, "batch deleted");
        Ok(DeletionOutcome::Deleted { images_removed })
    } else {
        warn!(batch_id, images_removed, "batch document was already absent");
        Ok(DeletionOutcome::ParentAlreadyAbsent { images_removed })
    }
}

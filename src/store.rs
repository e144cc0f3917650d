//! Record store interface.
//!
//! Collections are `users`, `batches` and the per-batch `images`
//! subcollection. Every call is independently consistent; there are no
//! transactions and no cascading deletes.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Batch, ImageRecord, Role, User};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Create or replace `users/{user.user_id}`.
    async fn put_user(&self, user: &User) -> Result<(), StoreError>;

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError>;

    async fn batches_for_doctor(&self, doctor_id: &str) -> Result<Vec<Batch>, StoreError>;

    async fn batches_for_patient(&self, patient_id: &str) -> Result<Vec<Batch>, StoreError>;

    /// Names of every batch in the store, whoever owns it.
    async fn batch_names(&self) -> Result<Vec<String>, StoreError>;

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, StoreError>;

    /// All images of a batch in the store's natural order.
    async fn images(&self, batch_id: &str) -> Result<Vec<ImageRecord>, StoreError>;

    /// Images whose prediction equals `prediction`, in natural order.
    async fn images_with_prediction(
        &self,
        batch_id: &str,
        prediction: &str,
    ) -> Result<Vec<ImageRecord>, StoreError>;

    async fn delete_image(&self, batch_id: &str, image_id: &str) -> Result<(), StoreError>;

    /// Returns `false` when the batch document was already gone.
    async fn delete_batch(&self, batch_id: &str) -> Result<bool, StoreError>;
}

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Batch, ImageRecord, Role, User};
use crate::store::RecordStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// [`RecordStore`] backed by the `cell_review` Postgres schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BATCH_COLUMNS: &str =
    "id, batch_name, doctor_id, patient_id, model_used, time_created";

const IMAGE_COLUMNS: &str =
    "id, prediction, confidence, cell_type_index, image_base64, file_name";

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let user_id: String = row.try_get("user_id")?;
    let role: String = row.try_get("role")?;
    let role = role.parse::<Role>().map_err(|err| StoreError::Corrupt {
        collection: "users",
        id: user_id.clone(),
        reason: err.to_string(),
    })?;

    Ok(User {
        role,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
        user_id,
    })
}

fn batch_from_row(row: &PgRow) -> Result<Batch, StoreError> {
    Ok(Batch {
        id: row.try_get("id")?,
        name: row.try_get("batch_name")?,
        doctor_id: row.try_get("doctor_id")?,
        patient_id: row.try_get("patient_id")?,
        model_used: row.try_get("model_used")?,
        time_created: row.try_get("time_created")?,
    })
}

fn image_from_row(row: &PgRow) -> Result<ImageRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let class_index: i32 = row.try_get("cell_type_index")?;
    let class_index = u32::try_from(class_index).map_err(|_| StoreError::Corrupt {
        collection: "images",
        id: id.clone(),
        reason: format!("negative class index {class_index}"),
    })?;

    Ok(ImageRecord {
        prediction: row.try_get("prediction")?,
        confidence: row.try_get("confidence")?,
        image_base64: row.try_get("image_base64")?,
        file_name: row.try_get("file_name")?,
        class_index,
        id,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM cell_review.users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cell_review.users
            (user_id, role, first_name, last_name, email, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE
            SET role = EXCLUDED.role,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email
            "#,
        )
        .bind(&user.user_id)
        .bind(user.role.as_str())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %user.user_id, role = %user.role, "stored user document");
        Ok(())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM cell_review.users WHERE role = $1")
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn batches_for_doctor(&self, doctor_id: &str) -> Result<Vec<Batch>, StoreError> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM cell_review.batches WHERE doctor_id = $1");
        let rows = sqlx::query(&query)
            .bind(doctor_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(batch_from_row).collect()
    }

    async fn batches_for_patient(&self, patient_id: &str) -> Result<Vec<Batch>, StoreError> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM cell_review.batches WHERE patient_id = $1");
        let rows = sqlx::query(&query)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(batch_from_row).collect()
    }

    async fn batch_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT batch_name FROM cell_review.batches")
            .fetch_all(&self.pool)
            .await?;

        let mut names: Vec<String> = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.try_get("batch_name")?);
        }
        Ok(names)
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, StoreError> {
        let query = format!("SELECT {BATCH_COLUMNS} FROM cell_review.batches WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn images(&self, batch_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let query = format!(
            "SELECT {IMAGE_COLUMNS} FROM cell_review.images WHERE batch_id = $1 ORDER BY seq"
        );
        let rows = sqlx::query(&query)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(image_from_row).collect()
    }

    async fn images_with_prediction(
        &self,
        batch_id: &str,
        prediction: &str,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        let query = format!(
            "SELECT {IMAGE_COLUMNS} FROM cell_review.images \
             WHERE batch_id = $1 AND prediction = $2 ORDER BY seq"
        );
        let rows = sqlx::query(&query)
            .bind(batch_id)
            .bind(prediction)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(image_from_row).collect()
    }

    async fn delete_image(&self, batch_id: &str, image_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cell_review.images WHERE batch_id = $1 AND id = $2")
            .bind(batch_id)
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cell_review.batches WHERE id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{debug, info};

use crate::error::ReviewResult;
use crate::models::{Batch, Role, User};
use crate::session::Session;
use crate::store::RecordStore;

pub const UNKNOWN_DOCTOR: &str = "Unknown Doctor";
pub const UNKNOWN_PATIENT: &str = "Unknown Patient";
pub const UNKNOWN_MODEL: &str = "Unknown Model";
pub const UNKNOWN_TIME: &str = "Unknown Time";

/// A batch as shown in the batch table, with people resolved to names.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub batch_id: String,
    pub batch_name: String,
    pub doctor_name: String,
    pub patient_name: String,
    pub time_created: String,
    pub model_used: String,
}

pub fn format_time<Tz>(time: Option<DateTime<Utc>>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match time {
        Some(time) => time
            .with_timezone(zone)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string(),
        None => UNKNOWN_TIME.to_string(),
    }
}

/// Looks users up once per id.
struct NameCache<'a> {
    store: &'a dyn RecordStore,
    names: HashMap<String, Option<String>>,
}

impl<'a> NameCache<'a> {
    fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            names: HashMap::new(),
        }
    }

    async fn name_of(&mut self, user_id: &str) -> ReviewResult<Option<String>> {
        if let Some(name) = self.names.get(user_id) {
            return Ok(name.clone());
        }
        let name = self.store.get_user(user_id).await?.as_ref().map(User::full_name);
        debug!(user_id, found = name.is_some(), "resolved user name");
        self.names.insert(user_id.to_string(), name.clone());
        Ok(name)
    }
}

async fn row_with<Tz>(cache: &mut NameCache<'_>, batch: Batch, zone: &Tz) -> ReviewResult<BatchRow>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let doctor_name = cache
        .name_of(&batch.doctor_id)
        .await?
        .unwrap_or_else(|| UNKNOWN_DOCTOR.to_string());
    let patient_name = cache
        .name_of(&batch.patient_id)
        .await?
        .unwrap_or_else(|| UNKNOWN_PATIENT.to_string());

    Ok(BatchRow {
        time_created: format_time(batch.time_created, zone),
        model_used: batch.model_used.unwrap_or_else(|| UNKNOWN_MODEL.to_string()),
        batch_id: batch.id,
        batch_name: batch.name,
        doctor_name,
        patient_name,
    })
}

/// Builds the row for a single batch, used when a view re-fetches by id.
pub async fn row_for_batch(store: &dyn RecordStore, batch: Batch) -> ReviewResult<BatchRow> {
    let mut cache = NameCache::new(store);
    row_with(&mut cache, batch, &Local).await
}

/// Batches the principal uploaded or is the subject of. Both sets are read
/// concurrently and joined before rows are built.
pub async fn fetch_batch_rows(store: &dyn RecordStore, session: &Session) -> ReviewResult<Vec<BatchRow>> {
    fetch_batch_rows_in(store, session, &Local).await
}

pub async fn fetch_batch_rows_in<Tz>(
    store: &dyn RecordStore,
    session: &Session,
    zone: &Tz,
) -> ReviewResult<Vec<BatchRow>>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let user_id = session.user_id();
    let (as_doctor, as_patient) = tokio::join!(
        store.batches_for_doctor(user_id),
        store.batches_for_patient(user_id)
    );
    let (as_doctor, as_patient) = (as_doctor?, as_patient?);

    let mut cache = NameCache::new(store);
    let mut rows: Vec<BatchRow> = Vec::with_capacity(as_doctor.len() + as_patient.len());
    for batch in as_doctor.into_iter().chain(as_patient) {
        if rows.iter().any(|row| row.batch_id == batch.id) {
            continue;
        }
        rows.push(row_with(&mut cache, batch, zone).await?);
    }

    info!(user_id, batches = rows.len(), "fetched batch listing");
    Ok(rows)
}

/// Subjects a clinician can pick for an upload, as `(id, "First Last")`.
pub async fn patient_options(store: &dyn RecordStore) -> ReviewResult<Vec<(String, String)>> {
    let patients = store.users_with_role(Role::Patient).await?;
    Ok(patients
        .into_iter()
        .map(|patient| {
            let name = patient.full_name();
            (patient.user_id, name)
        })
        .collect())
}

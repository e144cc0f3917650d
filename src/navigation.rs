//! Routes and the state carried between views.
//!
//! A view gets a [`NavigationContext`] from the view before it. Destination
//! views convert it into a typed context that names the fields they need;
//! anything missing is a [`ReviewError::MissingContext`]. The summary view
//! can also rebuild its context from the store by batch id.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReviewError, ReviewResult};
use crate::listing::{self, BatchRow};
use crate::models::{capitalize, ModelId};
use crate::session::Session;
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    SignIn,
    SignUp,
    Home,
    Batches,
    BatchSummary(String),
    Details,
}

impl Route {
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.trim_end_matches('/');
        match path {
            "" => Some(Route::SignIn),
            "/signup" => Some(Route::SignUp),
            "/home" => Some(Route::Home),
            "/batches" => Some(Route::Batches),
            "/details" => Some(Route::Details),
            _ => path
                .strip_prefix("/batch/")
                .filter(|id| !id.is_empty() && !id.contains('/'))
                .map(|id| Route::BatchSummary(id.to_string())),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::SignIn => "/".to_string(),
            Route::SignUp => "/signup".to_string(),
            Route::Home => "/home".to_string(),
            Route::Batches => "/batches".to_string(),
            Route::BatchSummary(id) => format!("/batch/{id}"),
            Route::Details => "/details".to_string(),
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Route::SignIn | Route::SignUp)
    }

    /// Sends signed-out users to the sign-in page.
    pub fn guard(self, session: Option<&Session>) -> Route {
        if self.requires_session() && session.is_none() {
            debug!(requested = %self.path(), "no session, redirecting to sign-in");
            return Route::SignIn;
        }
        self
    }
}

/// Untyped state handed from one view to the next. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationContext {
    pub batch_id: Option<String>,
    pub batch_name: Option<String>,
    pub doctor_name: Option<String>,
    pub patient_name: Option<String>,
    pub time_created: Option<String>,
    pub model_used: Option<String>,
    pub class_label: Option<String>,
}

impl NavigationContext {
    /// Batch table -> summary view.
    pub fn from_row(row: &BatchRow) -> Self {
        Self {
            batch_id: Some(row.batch_id.clone()),
            batch_name: Some(row.batch_name.clone()),
            doctor_name: Some(row.doctor_name.clone()),
            patient_name: Some(row.patient_name.clone()),
            time_created: Some(row.time_created.clone()),
            model_used: Some(row.model_used.clone()),
            class_label: None,
        }
    }
}

fn required(field: &Option<String>, name: &'static str) -> ReviewResult<String> {
    field
        .as_deref()
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ReviewError::MissingContext(name))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryContext {
    pub batch_id: String,
    pub batch_name: String,
    pub doctor_name: String,
    pub patient_name: String,
    pub time_created: String,
    pub model_used: String,
}

impl SummaryContext {
    pub fn model_display(&self) -> String {
        capitalize(&self.model_used)
    }

    /// Summary view -> detail view for one class.
    pub fn select_class(&self, label: &str) -> NavigationContext {
        NavigationContext {
            batch_id: Some(self.batch_id.clone()),
            model_used: Some(self.model_used.clone()),
            class_label: Some(label.to_string()),
            ..NavigationContext::default()
        }
    }
}

impl TryFrom<&NavigationContext> for SummaryContext {
    type Error = ReviewError;

    fn try_from(ctx: &NavigationContext) -> Result<Self, Self::Error> {
        Ok(Self {
            batch_id: required(&ctx.batch_id, "batch_id")?,
            batch_name: required(&ctx.batch_name, "batch_name")?,
            doctor_name: required(&ctx.doctor_name, "doctor_name")?,
            patient_name: required(&ctx.patient_name, "patient_name")?,
            time_created: required(&ctx.time_created, "time_created")?,
            model_used: required(&ctx.model_used, "model_used")?,
        })
    }
}

impl From<BatchRow> for SummaryContext {
    fn from(row: BatchRow) -> Self {
        Self {
            batch_id: row.batch_id,
            batch_name: row.batch_name,
            doctor_name: row.doctor_name,
            patient_name: row.patient_name,
            time_created: row.time_created,
            model_used: row.model_used,
        }
    }
}

/// Listing images only needs the batch and class. The model is kept when
/// it names a known classifier; older batches carry none.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailContext {
    pub batch_id: String,
    pub class_label: String,
    pub model: Option<ModelId>,
}

impl DetailContext {
    /// Model for an explanation request.
    pub fn explain_model(&self) -> ReviewResult<ModelId> {
        self.model.ok_or(ReviewError::MissingContext("model_used"))
    }
}

impl TryFrom<&NavigationContext> for DetailContext {
    type Error = ReviewError;

    fn try_from(ctx: &NavigationContext) -> Result<Self, Self::Error> {
        let model = ctx
            .model_used
            .as_deref()
            .and_then(|value| value.parse::<ModelId>().ok());
        Ok(Self {
            batch_id: required(&ctx.batch_id, "batch_id")?,
            class_label: required(&ctx.class_label, "class_label")?,
            model,
        })
    }
}

/// Context for `/batch/:id`. Uses the carried state when it is complete and
/// belongs to this batch, otherwise re-reads the batch from the store.
pub async fn resolve_summary_context(
    store: &dyn RecordStore,
    batch_id: &str,
    carried: Option<&NavigationContext>,
) -> ReviewResult<SummaryContext> {
    if let Some(ctx) = carried {
        match SummaryContext::try_from(ctx) {
            Ok(summary) if summary.batch_id == batch_id => return Ok(summary),
            Ok(summary) => debug!(
                route = batch_id,
                carried = %summary.batch_id,
                "navigation state belongs to another batch"
            ),
            Err(err) => debug!(error = %err, "incomplete navigation state"),
        }
    }

    let batch = store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| ReviewError::NotFound(format!("batch {batch_id}")))?;
    let row = listing::row_for_batch(store, batch).await?;
    Ok(SummaryContext::from(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::fixtures::{batch, user};
    use crate::store::memory::MemoryStore;

    fn row() -> BatchRow {
        BatchRow {
            batch_id: "b1".to_string(),
            batch_name: "Morning".to_string(),
            doctor_name: "Gregory House".to_string(),
            patient_name: "Ada Lovelace".to_string(),
            time_created: "3/14/2025, 3:09:26 PM".to_string(),
            model_used: "first_model".to_string(),
        }
    }

    #[test]
    fn routes_round_trip() {
        for route in [
            Route::SignIn,
            Route::SignUp,
            Route::Home,
            Route::Batches,
            Route::BatchSummary("abc123".to_string()),
            Route::Details,
        ] {
            assert_eq!(Route::parse(&route.path()), Some(route));
        }
        assert_eq!(Route::parse("/batch/"), None);
        assert_eq!(Route::parse("/nowhere"), None);
    }

    #[test]
    fn signed_out_users_are_sent_to_sign_in() {
        assert_eq!(Route::Home.guard(None), Route::SignIn);
        assert_eq!(Route::SignUp.guard(None), Route::SignUp);
        let session = Session::new("u", "u@x.example", "t");
        assert_eq!(Route::Details.guard(Some(&session)), Route::Details);
    }

    #[test]
    fn summary_to_details_carries_batch_class_and_model() {
        let summary = SummaryContext::try_from(&NavigationContext::from_row(&row())).unwrap();
        assert_eq!(summary.model_display(), "First_model");

        let detail = DetailContext::try_from(&summary.select_class("lymphocyte")).unwrap();
        assert_eq!(
            detail,
            DetailContext {
                batch_id: "b1".to_string(),
                class_label: "lymphocyte".to_string(),
                model: Some(ModelId::FirstModel),
            }
        );
        assert_eq!(detail.explain_model().unwrap(), ModelId::FirstModel);
    }

    #[test]
    fn missing_state_fails_predictably() {
        let err = DetailContext::try_from(&NavigationContext::default()).unwrap_err();
        assert!(matches!(err, ReviewError::MissingContext("batch_id")));

        let mut ctx = NavigationContext::from_row(&row());
        ctx.patient_name = None;
        let err = SummaryContext::try_from(&ctx).unwrap_err();
        assert!(matches!(err, ReviewError::MissingContext("patient_name")));
    }

    #[tokio::test]
    async fn summary_context_falls_back_to_the_store() {
        let store = MemoryStore::new();
        store.add_user(user("doc-1", Role::Doctor, "Gregory", "House"));
        store.add_user(user("pat-1", Role::Patient, "Ada", "Lovelace"));
        store.add_batch(batch("b1", "Morning", "doc-1", "pat-1"), Vec::new());

        let resolved = resolve_summary_context(&store, "b1", None).await.unwrap();
        assert_eq!(resolved.batch_name, "Morning");
        assert_eq!(resolved.patient_name, "Ada Lovelace");
        assert_eq!(resolved.model_used, "augmented");

        let mut stale = NavigationContext::from_row(&row());
        stale.batch_id = Some("other".to_string());
        let resolved = resolve_summary_context(&store, "b1", Some(&stale)).await.unwrap();
        assert_eq!(resolved.doctor_name, "Gregory House");

        let err = resolve_summary_context(&store, "missing", None).await.unwrap_err();
        assert!(matches!(err, ReviewError::NotFound(_)));
    }

    #[tokio::test]
    async fn details_open_for_batches_without_a_model() {
        let store = MemoryStore::new();
        let mut legacy = batch("b0", "Legacy", "doc-1", "pat-1");
        legacy.model_used = None;
        store.add_batch(legacy, Vec::new());

        let summary = resolve_summary_context(&store, "b0", None).await.unwrap();
        assert_eq!(summary.model_used, listing::UNKNOWN_MODEL);

        let detail = DetailContext::try_from(&summary.select_class("A")).unwrap();
        assert_eq!(detail.batch_id, "b0");
        assert_eq!(detail.class_label, "A");
        assert_eq!(detail.model, None);
        assert!(matches!(
            detail.explain_model(),
            Err(ReviewError::MissingContext("model_used"))
        ));
    }

    #[tokio::test]
    async fn carried_state_is_trusted_when_complete() {
        let store = MemoryStore::new();
        store.fail_reads();
        let carried = NavigationContext::from_row(&row());
        let resolved = resolve_summary_context(&store, "b1", Some(&carried)).await.unwrap();
        assert_eq!(resolved.batch_name, "Morning");
    }
}

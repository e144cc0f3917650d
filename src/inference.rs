//! Client for the external classification service.
//!
//! `POST /process` classifies a batch of images and stores the results;
//! `POST /explain` returns a base64 PNG overlay for one image. Both take
//! multipart forms. No timeout is set beyond the transport defaults.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::models::ModelId;
use crate::session::Session;

const USER_AGENT: &str = concat!("cell-review/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 16 * 1024;

/// Receives upload progress as a whole percentage.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    pub files: Vec<UploadFile>,
    pub batch_name: String,
    pub model: ModelId,
    pub patient_id: String,
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn process(
        &self,
        session: &Session,
        request: ProcessRequest,
        progress: ProgressFn,
    ) -> Result<(), ServiceError>;

    /// Returns the overlay as base64 PNG.
    async fn explain(
        &self,
        image: UploadFile,
        class_index: u32,
        model: ModelId,
    ) -> Result<String, ServiceError>;
}

pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[derive(Deserialize)]
struct ExplainResponse {
    explained_image: String,
}

/// Rounded percentage of `sent` over `total`; an empty upload is complete.
pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let sent = sent.min(total);
    ((sent * 100 + total / 2) / total) as u8
}

struct ProgressTracker {
    total: u64,
    sent: AtomicU64,
    reported: AtomicU8,
    report: ProgressFn,
}

impl ProgressTracker {
    fn advance(&self, bytes: usize) {
        let sent = self.sent.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
        let percent = percent_of(sent, self.total);
        if self.reported.fetch_max(percent, Ordering::Relaxed) < percent {
            (self.report)(percent);
        }
    }
}

fn tracked_part(file: UploadFile, tracker: Arc<ProgressTracker>) -> Result<Part, ServiceError> {
    let length = file.bytes.len() as u64;
    let chunks: Vec<Vec<u8>> = file.bytes.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        tracker.advance(chunk.len());
        Ok::<_, std::io::Error>(chunk)
    }));

    Part::stream_with_length(Body::wrap_stream(stream), length)
        .file_name(file.file_name)
        .mime_str(&file.mime_type)
        .map_err(|e| ServiceError::Transport(e.to_string()))
}

/// Prefer the service's `detail` message, fall back to the status code.
/// Validation failures arrive with a structured `detail`, which is passed
/// on as JSON text.
fn failure_from_body(status: u16, body: Option<serde_json::Value>) -> ServiceError {
    match body.as_ref().and_then(|b| b.get("detail")) {
        Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => {
            ServiceError::Rejected(detail.clone())
        }
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
            ServiceError::Status(status)
        }
        Some(other) => ServiceError::Rejected(other.to_string()),
    }
}

async fn failure_from(response: Response) -> ServiceError {
    let status = response.status().as_u16();
    failure_from_body(status, response.json().await.ok())
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn process(
        &self,
        session: &Session,
        request: ProcessRequest,
        progress: ProgressFn,
    ) -> Result<(), ServiceError> {
        let total: u64 = request.files.iter().map(|f| f.bytes.len() as u64).sum();
        let tracker = Arc::new(ProgressTracker {
            total,
            sent: AtomicU64::new(0),
            reported: AtomicU8::new(0),
            report: progress,
        });

        let file_count = request.files.len();
        let mut form = Form::new();
        for file in request.files {
            form = form.part("files", tracked_part(file, Arc::clone(&tracker))?);
        }
        let form = form
            .text("batch_name", request.batch_name.clone())
            .text("model_id", request.model.as_str())
            .text("patient_id", request.patient_id.clone());

        info!(
            batch_name = %request.batch_name,
            model = %request.model,
            files = file_count,
            bytes = total,
            "submitting batch for classification"
        );

        let response = self
            .http
            .post(self.url("process"))
            .bearer_auth(session.id_token())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let err = failure_from(response).await;
            warn!(batch_name = %request.batch_name, error = %err, "batch upload rejected");
            return Err(err);
        }

        Ok(())
    }

    async fn explain(
        &self,
        image: UploadFile,
        class_index: u32,
        model: ModelId,
    ) -> Result<String, ServiceError> {
        debug!(file = %image.file_name, class_index, model = %model, "requesting explanation");

        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime_type)
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let form = Form::new()
            .part("image", part)
            .text("class_to_explain", class_index.to_string())
            .text("model_id", model.as_str());

        let response = self
            .http
            .post(self.url("explain"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failure_from(response).await);
        }

        let body: ExplainResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        Ok(body.explained_image)
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use tokio::sync::Semaphore;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct ExplainCall {
        pub file_name: String,
        pub mime_type: String,
        pub class_index: u32,
        pub model: ModelId,
    }

    /// Records calls; `explain` waits for a permit so tests can hold
    /// requests in flight.
    pub struct ScriptedInference {
        pub processed: Mutex<Vec<ProcessRequest>>,
        pub explained: Mutex<Vec<ExplainCall>>,
        pub process_result: Mutex<Result<(), ServiceError>>,
        pub explain_error: Mutex<Option<ServiceError>>,
        pub permits: Semaphore,
    }

    impl ScriptedInference {
        pub fn new() -> Self {
            Self {
                processed: Mutex::new(Vec::new()),
                explained: Mutex::new(Vec::new()),
                process_result: Mutex::new(Ok(())),
                explain_error: Mutex::new(None),
                permits: Semaphore::new(Semaphore::MAX_PERMITS),
            }
        }

        pub fn held() -> Self {
            Self {
                permits: Semaphore::new(0),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl InferenceService for ScriptedInference {
        async fn process(
            &self,
            _session: &Session,
            request: ProcessRequest,
            progress: ProgressFn,
        ) -> Result<(), ServiceError> {
            self.processed.lock().unwrap().push(request);
            progress(100);
            self.process_result.lock().unwrap().clone()
        }

        async fn explain(
            &self,
            image: UploadFile,
            class_index: u32,
            model: ModelId,
        ) -> Result<String, ServiceError> {
            let _permit = self.permits.acquire().await.unwrap();
            self.explained.lock().unwrap().push(ExplainCall {
                file_name: image.file_name.clone(),
                mime_type: image.mime_type.clone(),
                class_index,
                model,
            });
            if let Some(err) = self.explain_error.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(BASE64.encode(format!("overlay:{}", image.file_name)))
        }
    }
}

//! Upload intake: everything that must hold before a batch leaves the
//! machine. Any failure rejects the whole batch.

use std::path::{Path, PathBuf};

use image::GenericImageView;
use tracing::{debug, info, warn};

use crate::error::{ReviewResult, ValidationError};
use crate::inference::{InferenceService, ProcessRequest, ProgressFn, UploadFile};
use crate::models::{ModelId, Role};
use crate::session::Session;
use crate::store::RecordStore;

pub const REQUIRED_DIMENSION: u32 = 250;

fn is_jpeg_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

fn check_dimensions(file: &UploadFile) -> Result<(), ValidationError> {
    let image = image::load_from_memory(&file.bytes)
        .map_err(|_| ValidationError::Unreadable(file.file_name.clone()))?;
    let (width, height) = image.dimensions();
    if width != REQUIRED_DIMENSION || height != REQUIRED_DIMENSION {
        return Err(ValidationError::WrongSize {
            file: file.file_name.clone(),
            width,
            height,
        });
    }
    Ok(())
}

/// A set of files that all passed the format and size gate.
#[derive(Debug, Clone)]
pub struct Intake {
    files: Vec<UploadFile>,
    folder_name: Option<String>,
}

impl Intake {
    pub fn new(files: Vec<UploadFile>, folder_name: Option<String>) -> Result<Self, ValidationError> {
        if files.is_empty() {
            return Err(ValidationError::NoFiles);
        }

        let rejected: Vec<&str> = files
            .iter()
            .filter(|f| !is_jpeg_name(&f.file_name))
            .map(|f| f.file_name.as_str())
            .collect();
        if !rejected.is_empty() {
            return Err(ValidationError::NotJpeg(rejected.join(", ")));
        }

        for file in &files {
            check_dimensions(file)?;
        }

        debug!(files = files.len(), "intake accepted");
        Ok(Self { files, folder_name })
    }

    pub fn from_paths(paths: &[PathBuf]) -> Result<Self, ValidationError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            if !is_jpeg_name(&file_name) {
                return Err(ValidationError::NotJpeg(file_name));
            }
            let bytes = std::fs::read(path).map_err(|err| {
                warn!(path = %path.display(), error = %err, "could not read upload candidate");
                ValidationError::Unreadable(file_name.clone())
            })?;
            files.push(UploadFile {
                file_name,
                mime_type: "image/jpeg".to_string(),
                bytes,
            });
        }

        Self::new(files, shared_folder_name(paths))
    }

    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    /// Name of the directory the files came from, when they share one.
    pub fn folder_name(&self) -> Option<&str> {
        self.folder_name.as_deref()
    }
}

fn shared_folder_name(paths: &[PathBuf]) -> Option<String> {
    let first = paths.first()?.parent()?;
    if paths.iter().any(|path| path.parent() != Some(first)) {
        return None;
    }
    first.file_name().map(|name| name.to_string_lossy().into_owned())
}

#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub batch_name: String,
    pub model: Option<String>,
    pub patient_id: Option<String>,
}

/// Runs the form checks in the order the user sees them and builds the
/// request. The uniqueness check scans every batch name.
pub async fn validate_upload(
    store: &dyn RecordStore,
    intake: Intake,
    form: &UploadForm,
) -> ReviewResult<ProcessRequest> {
    if form.batch_name.trim().is_empty() {
        return Err(ValidationError::MissingBatchName.into());
    }

    let names = store.batch_names().await?;
    if names.iter().any(|name| name == &form.batch_name) {
        return Err(ValidationError::DuplicateBatchName.into());
    }

    let model = match form.model.as_deref() {
        None | Some("") => return Err(ValidationError::MissingModel.into()),
        Some(value) => value.parse::<ModelId>()?,
    };

    let patient_id = match form.patient_id.as_deref() {
        None | Some("") => return Err(ValidationError::MissingPatient.into()),
        Some(value) => value,
    };
    let patients = store.users_with_role(Role::Patient).await?;
    if !patients.iter().any(|patient| patient.user_id == patient_id) {
        return Err(ValidationError::UnknownPatient(patient_id.to_string()).into());
    }

    Ok(ProcessRequest {
        files: intake.files,
        batch_name: form.batch_name.clone(),
        model,
        patient_id: patient_id.to_string(),
    })
}

/// Validates, uploads, and calls `on_complete` once when the service
/// accepted the batch.
pub async fn submit_upload<F>(
    store: &dyn RecordStore,
    service: &dyn InferenceService,
    session: &Session,
    intake: Intake,
    form: &UploadForm,
    progress: ProgressFn,
    on_complete: F,
) -> ReviewResult<()>
where
    F: FnOnce(&str),
{
    let request = validate_upload(store, intake, form).await?;
    let batch_name = request.batch_name.clone();

    service.process(session, request, progress).await?;

    info!(batch_name = %batch_name, uploader = %session.user_id(), "batch uploaded");
    on_complete(&batch_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;
    use crate::error::{ReviewError, ServiceError};
    use crate::inference::testing::ScriptedInference;
    use crate::store::fixtures::{batch, user};
    use crate::store::memory::MemoryStore;

    fn jpeg(name: &str, side: u32) -> UploadFile {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(side, side))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        UploadFile {
            file_name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes,
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_user(user("doc-1", Role::Doctor, "Gregory", "House"));
        store.add_user(user("pat-1", Role::Patient, "Ada", "Lovelace"));
        store.add_batch(batch("b-a", "A", "doc-1", "pat-1"), Vec::new());
        store.add_batch(batch("b-b", "B", "doc-1", "pat-1"), Vec::new());
        store
    }

    fn form(name: &str) -> UploadForm {
        UploadForm {
            batch_name: name.to_string(),
            model: Some("augmented".to_string()),
            patient_id: Some("pat-1".to_string()),
        }
    }

    fn intake() -> Intake {
        Intake::new(vec![jpeg("c1.jpg", 250), jpeg("c2.JPEG", 250)], None).unwrap()
    }

    #[test]
    fn one_wrong_sized_image_rejects_the_whole_set() {
        let err = Intake::new(vec![jpeg("ok.jpg", 250), jpeg("small.jpg", 100)], None).unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongSize {
                file: "small.jpg".to_string(),
                width: 100,
                height: 100,
            }
        );
    }

    #[test]
    fn non_jpeg_names_and_garbage_are_rejected() {
        let png = jpeg("cell.png", 250);
        assert!(matches!(
            Intake::new(vec![png], None),
            Err(ValidationError::NotJpeg(_))
        ));

        let garbage = UploadFile {
            file_name: "broken.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: b"definitely not a jpeg".to_vec(),
        };
        assert_eq!(
            Intake::new(vec![garbage], None).unwrap_err(),
            ValidationError::Unreadable("broken.jpg".to_string())
        );
        assert_eq!(Intake::new(Vec::new(), None).unwrap_err(), ValidationError::NoFiles);
    }

    #[test]
    fn reads_files_from_a_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("smear-0412");
        std::fs::create_dir(&folder).unwrap();
        let mut paths = Vec::new();
        for name in ["a.jpg", "b.jpg"] {
            let path = folder.join(name);
            std::fs::write(&path, jpeg(name, 250).bytes).unwrap();
            paths.push(path);
        }

        let intake = Intake::from_paths(&paths).unwrap();
        assert_eq!(intake.files().len(), 2);
        assert_eq!(intake.folder_name(), Some("smear-0412"));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_new_name_passes() {
        let store = store();

        let err = validate_upload(&store, intake(), &form("A")).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::Validation(ValidationError::DuplicateBatchName)
        ));

        let request = validate_upload(&store, intake(), &form("C")).await.unwrap();
        assert_eq!(request.batch_name, "C");
        assert_eq!(request.model, ModelId::Augmented);
        assert_eq!(request.files.len(), 2);
    }

    #[tokio::test]
    async fn missing_fields_are_reported_in_order() {
        let store = store();

        let err = validate_upload(&store, intake(), &form("  ")).await.unwrap_err();
        assert!(matches!(err, ReviewError::Validation(ValidationError::MissingBatchName)));

        let mut no_model = form("C");
        no_model.model = None;
        no_model.patient_id = None;
        let err = validate_upload(&store, intake(), &no_model).await.unwrap_err();
        assert!(matches!(err, ReviewError::Validation(ValidationError::MissingModel)));

        let mut bad_model = form("C");
        bad_model.model = Some("vgg".to_string());
        let err = validate_upload(&store, intake(), &bad_model).await.unwrap_err();
        assert!(matches!(err, ReviewError::Validation(ValidationError::UnknownModel(_))));

        let mut no_patient = form("C");
        no_patient.patient_id = Some(String::new());
        let err = validate_upload(&store, intake(), &no_patient).await.unwrap_err();
        assert!(matches!(err, ReviewError::Validation(ValidationError::MissingPatient)));
    }

    #[tokio::test]
    async fn subject_must_be_a_patient() {
        let store = store();
        let mut doctor_as_subject = form("C");
        doctor_as_subject.patient_id = Some("doc-1".to_string());
        let err = validate_upload(&store, intake(), &doctor_as_subject).await.unwrap_err();
        assert!(matches!(err, ReviewError::Validation(ValidationError::UnknownPatient(_))));
    }

    #[tokio::test]
    async fn rejected_upload_never_reaches_the_service() {
        let store = store();
        let service = ScriptedInference::new();
        let session = Session::new("doc-1", "house@clinic.example", "token");
        let completed = Mutex::new(0);

        let result = submit_upload(
            &store,
            &service,
            &session,
            intake(),
            &form("B"),
            Arc::new(|_: u8| {}),
            |_| *completed.lock().unwrap() += 1,
        )
        .await;

        assert!(result.is_err());
        assert!(service.processed.lock().unwrap().is_empty());
        assert_eq!(*completed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn successful_upload_notifies_exactly_once() {
        let store = store();
        let service = ScriptedInference::new();
        let session = Session::new("doc-1", "house@clinic.example", "token");
        let completed = Mutex::new(Vec::new());
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);

        submit_upload(
            &store,
            &service,
            &session,
            intake(),
            &form("C"),
            Arc::new(move |p: u8| sink.lock().unwrap().push(p)),
            |name| completed.lock().unwrap().push(name.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(*completed.lock().unwrap(), vec!["C".to_string()]);
        assert_eq!(*progress.lock().unwrap(), vec![100]);
        let processed = service.processed.lock().unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].patient_id, "pat-1");
    }

    #[tokio::test]
    async fn service_failure_skips_completion() {
        let store = store();
        let service = ScriptedInference::new();
        *service.process_result.lock().unwrap() =
            Err(ServiceError::Rejected("Invalid token".to_string()));
        let session = Session::new("doc-1", "house@clinic.example", "token");
        let completed = Mutex::new(0);

        let err = submit_upload(
            &store,
            &service,
            &session,
            intake(),
            &form("C"),
            Arc::new(|_: u8| {}),
            |_| *completed.lock().unwrap() += 1,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Invalid token");
        assert_eq!(*completed.lock().unwrap(), 0);
    }
}

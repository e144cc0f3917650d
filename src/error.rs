use thiserror::Error;

/// Failures reported by a [`crate::store::RecordStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt document {collection}/{id}: {reason}")]
    Corrupt {
        collection: &'static str,
        id: String,
        reason: String,
    },

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// User input that fails a precondition. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Password must be at least 8 characters")]
    ShortPassword,

    #[error("Unknown role `{0}`: expected doctor or patient")]
    UnknownRole(String),

    #[error("Please add at least one image.")]
    NoFiles,

    #[error("Please upload only JPG/JPEG images. Rejected: {0}")]
    NotJpeg(String),

    #[error("Failed to load image {0}.")]
    Unreadable(String),

    #[error("Image must be 250x250 pixels. {file} is {width}x{height}.")]
    WrongSize {
        file: String,
        width: u32,
        height: u32,
    },

    #[error("Please enter a batch name.")]
    MissingBatchName,

    #[error("Batch name already exists. Please choose a different name.")]
    DuplicateBatchName,

    #[error("Please select a model.")]
    MissingModel,

    #[error("Unknown model `{0}`")]
    UnknownModel(String),

    #[error("Please select a patient.")]
    MissingPatient,

    #[error("No patient with id `{0}`")]
    UnknownPatient(String),
}

/// Identity provider failures, already mapped to what the user should see.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("Invalid email format")]
    InvalidEmail,

    #[error("No account found with this email")]
    UserNotFound,

    #[error("Incorrect password")]
    WrongPassword,

    #[error("Email already exists. Try signing in.")]
    EmailInUse,

    #[error("Failed to sign in. Please try again.")]
    SignInFailed,

    #[error("Failed to create account. Please try again.")]
    SignUpFailed,
}

/// Inference service failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// The service answered with a `detail` message.
    #[error("{0}")]
    Rejected(String),

    #[error("Request failed with status code {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unreadable response from inference service: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("navigation state is missing `{0}`; open this view from the previous one")]
    MissingContext(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("image {image_id} has an undecodable payload: {reason}")]
    CorruptPayload { image_id: String, reason: String },

    #[error("an explanation for image {0} is already being generated")]
    ExplanationPending(String),
}

pub type ReviewResult<T> = Result<T, ReviewError>;

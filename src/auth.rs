//! Sign-in and sign-up against the external identity provider.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AuthError, ReviewResult, ValidationError};
use crate::models::{Role, User};
use crate::session::Session;
use crate::store::RecordStore;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOp {
    SignIn,
    SignUp,
}

/// Maps a provider error code onto the message taxonomy.
pub fn map_provider_code(code: &str, op: AuthOp) -> AuthError {
    // Codes may carry a trailing explanation: "INVALID_PASSWORD : ..."
    let code = code.split([' ', ':']).next().unwrap_or_default();
    match (op, code) {
        (AuthOp::SignIn, "INVALID_EMAIL") => AuthError::InvalidEmail,
        (AuthOp::SignIn, "EMAIL_NOT_FOUND") => AuthError::UserNotFound,
        (AuthOp::SignIn, "INVALID_PASSWORD") => AuthError::WrongPassword,
        (AuthOp::SignUp, "EMAIL_EXISTS") => AuthError::EmailInUse,
        (AuthOp::SignIn, _) => AuthError::SignInFailed,
        (AuthOp::SignUp, _) => AuthError::SignUpFailed,
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self, session: Session);
}

/// Shape check equivalent to `\S+@\S+\.\S+`.
pub fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    value.match_indices('@').any(|(at, _)| {
        let domain = &value[at + 1..];
        at > 0
            && domain
                .match_indices('.')
                .any(|(dot, _)| dot > 0 && dot + 1 < domain.len())
    })
}

pub fn validate_sign_in(email: &str, password: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::Required("Email"));
    }
    if password.is_empty() {
        return Err(ValidationError::Required("Password"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.is_empty() {
            return Err(ValidationError::Required("Email"));
        }
        if !looks_like_email(&self.email) {
            return Err(ValidationError::InvalidEmail);
        }
        if self.password.is_empty() {
            return Err(ValidationError::Required("Password"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::ShortPassword);
        }
        if self.first_name.trim().is_empty() {
            return Err(ValidationError::Required("First name"));
        }
        if self.last_name.trim().is_empty() {
            return Err(ValidationError::Required("Last name"));
        }
        Ok(())
    }
}

pub async fn sign_in(
    provider: &dyn IdentityProvider,
    email: &str,
    password: &str,
) -> ReviewResult<Session> {
    validate_sign_in(email, password)?;
    let session = provider.sign_in(email, password).await?;
    info!(user_id = %session.user_id(), "signed in");
    Ok(session)
}

/// Creates the account, then writes `users/{uid}` with the chosen role.
pub async fn sign_up(
    provider: &dyn IdentityProvider,
    store: &dyn RecordStore,
    form: &SignUpForm,
) -> ReviewResult<Session> {
    form.validate()?;
    let session = provider.sign_up(&form.email, &form.password).await?;

    let user = User {
        user_id: session.user_id().to_string(),
        role: form.role,
        first_name: form.first_name.trim().to_string(),
        last_name: form.last_name.trim().to_string(),
        email: form.email.clone(),
        created_at: Utc::now(),
    };
    store.put_user(&user).await?;

    info!(user_id = %user.user_id, role = %user.role, "account created");
    Ok(session)
}

/// Email/password accounts through the Identity Toolkit REST API.
pub struct FirebaseIdentity {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    email: Option<String>,
    id_token: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl FirebaseIdentity {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn password_call(
        &self,
        endpoint: &str,
        email: &str,
        password: &str,
        op: AuthOp,
    ) -> Result<Session, AuthError> {
        let generic = match op {
            AuthOp::SignIn => AuthError::SignInFailed,
            AuthOp::SignUp => AuthError::SignUpFailed,
        };

        let response = self
            .http
            .post(format!("{}/accounts:{endpoint}", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "identity provider unreachable");
                generic.clone()
            })?;

        if !response.status().is_success() {
            let code = response
                .json::<ErrorEnvelope>()
                .await
                .map(|envelope| envelope.error.message)
                .unwrap_or_default();
            warn!(code = %code, ?op, "identity provider refused request");
            return Err(map_provider_code(&code, op));
        }

        let body: PasswordResponse = response.json().await.map_err(|err| {
            warn!(error = %err, "unreadable identity provider response");
            generic
        })?;
        Ok(Session::new(
            body.local_id,
            body.email.unwrap_or_else(|| email.to_string()),
            body.id_token,
        ))
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.password_call("signInWithPassword", email, password, AuthOp::SignIn)
            .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.password_call("signUp", email, password, AuthOp::SignUp)
            .await
    }

    /// ID tokens are bearer tokens with no server-side session to end.
    async fn sign_out(&self, session: Session) {
        info!(user_id = %session.user_id(), "signed out");
    }
}

use std::fmt;

/// An authenticated principal, passed explicitly to everything that needs
/// the current user.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    user_id: String,
    email: String,
    id_token: String,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        id_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            id_token: id_token.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Token for the inference service `Authorization: Bearer` header.
    pub fn id_token(&self) -> &str {
        &self.id_token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("id_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_token() {
        let session = Session::new("uid-1", "a@b.example", "secret-token");
        let rendered = format!("{session:?}");
        assert!(rendered.contains("uid-1"));
        assert!(!rendered.contains("secret-token"));
    }
}

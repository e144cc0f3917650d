//! TOML configuration with environment overrides.
//!
//! A missing file is not an error: compiled defaults are used and `main`
//! logs a warning once tracing is up.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "cell-review.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: Option<String>,
    pub inference_url: String,
    pub identity_url: String,
    pub identity_api_key: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub log_level: String,

    /// File the values were read from, `None` when running on defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            inference_url: "http://127.0.0.1:5000".to_string(),
            identity_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            identity_api_key: None,
            email: None,
            password: None,
            log_level: "info".to_string(),
            source: None,
        }
    }
}

impl Config {
    /// Reads `path`, or `cell-review.toml` in the working directory.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DATABASE_URL") {
            self.database_url = Some(value);
        }
        if let Some(value) = lookup("INFERENCE_URL") {
            self.inference_url = value;
        }
        if let Some(value) = lookup("IDENTITY_URL") {
            self.identity_url = value;
        }
        if let Some(value) = lookup("IDENTITY_API_KEY") {
            self.identity_api_key = Some(value);
        }
        if let Some(value) = lookup("CELL_REVIEW_EMAIL") {
            self.email = Some(value);
        }
        if let Some(value) = lookup("CELL_REVIEW_PASSWORD") {
            self.password = Some(value);
        }
        self
    }
}

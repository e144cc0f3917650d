use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Doctor => "Doctor",
            Role::Patient => "Patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

/// Classifier variants the inference service can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    Augmented,
    FirstModel,
    Model,
    Optimised,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [
        ModelId::Augmented,
        ModelId::FirstModel,
        ModelId::Model,
        ModelId::Optimised,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelId::Augmented => "augmented",
            ModelId::FirstModel => "first_model",
            ModelId::Model => "model",
            ModelId::Optimised => "optimised",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .into_iter()
            .find(|model| model.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownModel(value.to_string()))
    }
}

/// Uppercases the first character, leaving the rest untouched.
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub time_created: Option<DateTime<Utc>>,
    /// Older batches were written before the model was recorded.
    pub model_used: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub prediction: String,
    /// Percentage in 0..=100.
    pub confidence: f64,
    /// Numeric class the inference service uses for this prediction.
    pub class_index: u32,
    pub image_base64: String,
    pub file_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_rejects_third_values() {
        assert_eq!("doctor".parse::<Role>(), Ok(Role::Doctor));
        assert_eq!("patient".parse::<Role>(), Ok(Role::Patient));
        assert_eq!(
            "admin".parse::<Role>(),
            Err(ValidationError::UnknownRole("admin".to_string()))
        );
        assert!("Doctor".parse::<Role>().is_err());
    }

    #[test]
    fn model_ids_round_trip_through_their_wire_names() {
        for model in ModelId::ALL {
            assert_eq!(model.as_str().parse::<ModelId>(), Ok(model));
        }
        assert!("resnet".parse::<ModelId>().is_err());
    }

    #[test]
    fn capitalize_only_touches_first_letter() {
        assert_eq!(capitalize("first_model"), "First_model");
        assert_eq!(capitalize(""), "");
    }
}

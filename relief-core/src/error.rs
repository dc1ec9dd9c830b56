//! Error types shared across RELIEF crates

use thiserror::Error;

/// Validation errors for inbound reports and queries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Report payload is empty")]
    EmptyPayload,

    #[error("Report payload is malformed: {reason}")]
    Malformed { reason: String },

    #[error("Report payload must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Field {field} is blank")]
    BlankField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Report payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Report nesting exceeds depth {limit}")]
    TooDeep { limit: usize },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Origin data-store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Repository unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Repository lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

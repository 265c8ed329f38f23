//! Error types for directive handling.

use thiserror::Error;

/// Result type alias for directive operations.
pub type DirectiveResult<T> = Result<T, DirectiveError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `exercises[1].sets`)
    pub field: String,
    /// Human-readable message
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors that can occur while extracting or validating directives.
#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error("Unknown directive type: {0}")]
    UnknownKind(String),

    #[error("Malformed payload for {kind}: {message}")]
    MalformedPayload { kind: String, message: String },

    #[error("Validation failed for {kind}: {}", format_field_errors(.errors))]
    Validation { kind: String, errors: Vec<FieldError> },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DirectiveError {
    /// Field errors carried by a validation failure (empty otherwise).
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

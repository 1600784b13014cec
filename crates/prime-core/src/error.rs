//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// A wire ordinal did not name any variant of a semantic type enum
    #[error("Invalid {kind} ordinal: {value}")]
    InvalidOrdinal { kind: &'static str, value: u32 },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// A required node of the architecture document is missing
    #[error("Architecture document is missing {path}")]
    MissingNode { path: String },

    /// A dotted path did not resolve to a knob or monitor
    #[error("Unknown architecture path: {path}")]
    UnknownPath { path: String },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },

    /// The architecture document could not be read from disk
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

impl DomainError {
    /// Builds a parse error for `field` from any displayable cause.
    pub fn parse<E: std::fmt::Display>(field: impl Into<String>, err: E) -> Self {
        Self::ParseError {
            field: field.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

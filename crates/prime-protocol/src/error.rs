//! Codec errors.

use thiserror::Error;

/// Errors raised while encoding or decoding a frame.
///
/// Every variant is recoverable: receivers log the error and drop the
/// datagram, the channel itself stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Zero-length datagram
    #[error("empty frame")]
    Empty,

    /// Fast-path frame is not valid UTF-8
    #[error("fast-path frame is not valid UTF-8")]
    InvalidUtf8,

    /// First byte of a fast-path frame is not a known tag
    #[error("unknown fast-path tag: {0:?}")]
    UnknownTag(String),

    /// Fast-path frame has the wrong number of fields for its tag
    #[error("tag '{tag}' expects {expected} fields, found {found}")]
    FieldCount {
        tag: char,
        expected: usize,
        found: usize,
    },

    /// A field could not be parsed
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    /// Slow-path document is not valid JSON or lacks its envelope
    #[error("malformed document: {0}")]
    Json(String),

    /// Slow-path `type` string is not in the dispatch table
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Slow-path `data` does not match the shape required by its type
    #[error("malformed {msg_type} payload: {reason}")]
    Payload { msg_type: String, reason: String },
}

impl ProtocolError {
    /// Creates an invalid-field error.
    pub fn field(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }

    /// Creates a JSON error from any error type.
    pub fn json<E: std::fmt::Display>(err: E) -> Self {
        Self::Json(err.to_string())
    }

    /// Creates a payload error for the given message type.
    pub fn payload<E: std::fmt::Display>(msg_type: impl std::fmt::Display, err: E) -> Self {
        Self::Payload {
            msg_type: msg_type.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

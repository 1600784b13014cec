//! Errors surfaced by blocking interface calls.

use std::time::Duration;

use prime_core::DomainError;
use prime_protocol::{Frame, ProtocolError, RequestId};
use thiserror::Error;

use crate::transport::TransportError;
use crate::waiter::WaitError;

/// Errors returned by App, Device and UI interfaces.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No reply arrived within the configured timeout
    #[error("request {req} timed out after {after:?}")]
    Timeout { req: RequestId, after: Duration },

    /// The interface shut down while the call was waiting
    #[error("request {req} cancelled")]
    Cancelled { req: RequestId },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A reply arrived under the right request id but with the wrong shape
    #[error("expected {expected}, got {found}")]
    UnexpectedReply { expected: &'static str, found: String },

    /// The call needs a registered session
    #[error("not registered with the runtime manager")]
    NotRegistered,

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}

impl ApiError {
    /// Creates an unexpected-reply error naming what actually arrived.
    pub fn unexpected(expected: &'static str, found: &Frame) -> Self {
        let found = match found {
            Frame::Fast(frame) => format!("fast-path frame '{}'", frame.tag()),
            Frame::Slow(frame) => frame.message.message_type().to_string(),
        };
        Self::UnexpectedReply { expected, found }
    }
}

impl From<WaitError> for ApiError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { req, after } => Self::Timeout { req, after },
            WaitError::Cancelled { req } => Self::Cancelled { req },
        }
    }
}

/// Result type for interface calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use prime_protocol::{SlowFrame, SlowMessage};

    #[test]
    fn test_timeout_display() {
        let err = ApiError::from(WaitError::Timeout {
            req: RequestId::new(4),
            after: Duration::from_millis(50),
        });
        assert_eq!(err.to_string(), "request 4 timed out after 50ms");
    }

    #[test]
    fn test_unexpected_names_message_type() {
        let frame = Frame::Slow(SlowFrame::new(SlowMessage::UiRtmStop));
        let err = ApiError::unexpected("PRIME_API_APP_RETURN_APP_REG", &frame);
        assert!(err.to_string().contains("PRIME_UI_RTM_STOP"));
    }
}

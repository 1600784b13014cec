//! Path discrimination.
//!
//! A receiver never knows in advance which path a datagram travelled on.
//! Slow-path documents always begin with `{`; every fast-path tag is an
//! ASCII digit or lowercase letter, so the first byte is enough.

use prime_core::Timestamp;

use crate::error::{ProtocolError, ProtocolResult};
use crate::fast::FastFrame;
use crate::message::SlowFrame;
use crate::request::RequestId;

/// Any frame that may arrive on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Fast(FastFrame),
    Slow(SlowFrame),
}

impl Frame {
    /// Decodes a datagram, choosing the path from its first byte.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        match bytes.first() {
            None => Err(ProtocolError::Empty),
            Some(b'{') => SlowFrame::decode(bytes).map(Self::Slow),
            Some(_) => FastFrame::decode(bytes).map(Self::Fast),
        }
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        match self {
            Self::Fast(frame) => Ok(frame.encode()),
            Self::Slow(frame) => frame.encode(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Fast(frame) => frame.timestamp(),
            Self::Slow(frame) => frame.ts,
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Fast(frame) => frame.request_id(),
            Self::Slow(frame) => frame.req,
        }
    }

    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast(_))
    }
}

impl From<FastFrame> for Frame {
    fn from(frame: FastFrame) -> Self {
        Self::Fast(frame)
    }
}

impl From<SlowFrame> for Frame {
    fn from(frame: SlowFrame) -> Self {
        Self::Slow(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SlowMessage;
    use crate::tag::FastTag;

    #[test]
    fn test_empty_datagram() {
        assert_eq!(Frame::decode(b""), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_no_fast_tag_collides_with_slow_path() {
        for tag in FastTag::ALL {
            assert_ne!(tag.as_byte(), b'{', "{tag}");
        }
    }

    #[test]
    fn test_slow_document_selects_slow_path() {
        let frame = SlowFrame::with_req(SlowMessage::AppDeregister { proc_id: 5 }, RequestId::new(2));
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert!(!decoded.is_fast());
        assert_eq!(decoded.request_id(), Some(RequestId::new(2)));
        assert_eq!(decoded, Frame::Slow(frame));
    }

    #[test]
    fn test_fast_record_selects_fast_path() {
        let decoded = Frame::decode("f¿3¿42¿1234¿99".as_bytes()).unwrap();
        assert!(decoded.is_fast());
        assert_eq!(decoded.timestamp(), 99);
        assert_eq!(decoded.request_id(), None);
    }

    #[test]
    fn test_unknown_first_byte() {
        assert!(matches!(
            Frame::decode(b"Z\xC2\xBF1"),
            Err(ProtocolError::UnknownTag(_))
        ));
    }
}

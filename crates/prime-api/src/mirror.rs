//! Best-effort side-channel sender for the logger and the UI.

use prime_protocol::{FastFrame, Frame, SlowFrame};
use tracing::warn;

use crate::transport::{Binding, TransportError, Transport};

/// A send-only channel that may be switched off. Never blocks, never fails.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    transport: Option<Transport>,
}

impl Mirror {
    /// A mirror that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Opens a mirror for a resolved binding. A channel that cannot be
    /// bound is logged and left disabled.
    pub fn open(binding: Result<Option<Binding>, TransportError>, channel: &'static str) -> Self {
        let binding = match binding {
            Ok(Some(binding)) => binding,
            Ok(None) => return Self::disabled(),
            Err(e) => {
                warn!(channel, error = %e, "Side channel unavailable");
                return Self::disabled();
            }
        };
        match Transport::send_only(&binding) {
            Ok(transport) => Self {
                transport: Some(transport),
            },
            Err(e) => {
                warn!(channel, error = %e, "Side channel unavailable");
                Self::disabled()
            }
        }
    }

    /// Wraps an existing transport.
    pub fn from_transport(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn send_bytes(&self, bytes: &[u8]) {
        if let Some(transport) = &self.transport {
            transport.send(bytes);
        }
    }

    pub fn fast(&self, frame: &FastFrame) {
        if self.is_enabled() {
            self.send_bytes(&frame.encode());
        }
    }

    pub fn slow(&self, frame: &SlowFrame) {
        if !self.is_enabled() {
            return;
        }
        match frame.encode() {
            Ok(bytes) => self.send_bytes(&bytes),
            Err(e) => warn!(error = %e, "Failed to encode mirrored frame"),
        }
    }

    pub fn frame(&self, frame: &Frame) {
        match frame {
            Frame::Fast(f) => self.fast(f),
            Frame::Slow(f) => self.slow(f),
        }
    }
}

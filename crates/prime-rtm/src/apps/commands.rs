//! App registry commands, errors, and events.
//!
//! - `AppCommand`: messages processed by the `AppRegistryActor`
//! - `RegistryError`: failures reported through the handle
//! - `AppEvent`: notifications broadcast to subscribers

use std::fmt;

use chrono::{DateTime, Utc};
use prime_api::{Datagram, Endpoint};
use prime_core::{AppKnob, AppMonitor, ScalarKind, Value};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Commands
// ============================================================================

/// Which transport an inbound datagram arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The shared registration endpoint
    Rendezvous,
    /// The dedicated channel of a registered App
    Session(u32),
}

/// Commands sent to the registry actor.
///
/// Queries carry a oneshot for the answer. `Inbound` is fed by the receive
/// tasks of the rendezvous and fan-out transports.
#[derive(Debug)]
pub enum AppCommand {
    Inbound {
        source: Source,
        datagram: Datagram,
    },

    /// Sets the value an App reads back with its next knob get.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound`, `RegistryError::KnobNotFound`
    /// - `RegistryError::DomainMismatch` if `val` is in the wrong domain
    KnobSet {
        pid: u32,
        id: u32,
        val: Value,
        respond_to: oneshot::Sender<Result<AppKnob, RegistryError>>,
    },

    /// Records the UI-assigned weight of an App.
    SetAppWeight {
        pid: u32,
        weight: f32,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    GetKnob {
        pid: u32,
        id: u32,
        respond_to: oneshot::Sender<Option<AppKnob>>,
    },

    GetMonitor {
        pid: u32,
        id: u32,
        respond_to: oneshot::Sender<Option<AppMonitor>>,
    },

    GetKnobs {
        respond_to: oneshot::Sender<Vec<AppKnob>>,
    },

    GetMonitors {
        respond_to: oneshot::Sender<Vec<AppMonitor>>,
    },

    GetSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Removes sessions whose lease lapsed, answering with how many.
    ReapExpired {
        respond_to: Option<oneshot::Sender<usize>>,
    },
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("no session for pid {0}")]
    SessionNotFound(u32),

    #[error("pid {pid} has no knob {id}")]
    KnobNotFound { pid: u32, id: u32 },

    #[error("expected a {expected} value, got {found}")]
    DomainMismatch {
        expected: ScalarKind,
        found: ScalarKind,
    },

    #[error("failed to set up app endpoint: {0}")]
    Setup(String),

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    pub fn setup<E: fmt::Display>(err: E) -> Self {
        Self::Setup(err.to_string())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterReason {
    /// The App deregistered itself
    Explicit,
    /// No traffic or heartbeat within the lease
    LeaseExpired,
}

impl fmt::Display for DeregisterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::LeaseExpired => write!(f, "lease expired"),
        }
    }
}

/// Events published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    AppRegistered {
        pid: u32,
        ur_id: u64,
    },
    AppDeregistered {
        pid: u32,
        reason: DeregisterReason,
    },
    /// A registration claimed a pid its sender does not own.
    AddressMismatch {
        claimed_pid: u32,
        from: Option<Endpoint>,
    },
    KnobRegistered(AppKnob),
    KnobDeregistered {
        pid: u32,
        id: u32,
    },
    /// A knob bound changed.
    KnobChanged(AppKnob),
    MonitorRegistered(AppMonitor),
    MonitorDeregistered {
        pid: u32,
        id: u32,
    },
    /// A monitor value, bound or weight changed.
    MonitorChanged(AppMonitor),
}

/// Read-only summary of one App session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub pid: u32,
    pub ur_id: u64,
    /// Weight assigned from the UI
    pub weight: f32,
    pub knobs: usize,
    pub monitors: usize,
    /// Where the App is reached
    pub peer: Option<Endpoint>,
    pub registered_at: DateTime<Utc>,
}

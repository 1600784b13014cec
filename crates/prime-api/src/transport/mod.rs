//! Datagram transport.
//!
//! One [`Transport`] is one bound endpoint with one default peer, over a
//! Unix datagram socket or UDP. Sends are fire-and-forget; inbound datagrams
//! are consumed either from a pull queue ([`Transport::with_inbox`]) or by a
//! callback running on the transport's private receive task
//! ([`Transport::with_handler`]), never both.
//!
//! ```text
//!               send(bytes)                      recv task
//! owner ──────────────────────▶ socket ◀────────────────────── peer
//!                                  │
//!                   ┌──────────────┴──────────────┐
//!                   ▼                             ▼
//!           Inbox (mpsc queue)            handler(Datagram)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are logged and swallowed
//! - Receive errors are logged and the receive loop keeps running

mod socket;

pub use socket::{Inbox, Transport};

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Capacity of the pull queue. Datagrams arriving at a full queue are dropped.
pub const INBOX_CAPACITY: usize = 1024;

/// Address of one side of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Filesystem path of a Unix datagram socket
    Unix(PathBuf),
    /// UDP socket address
    Udp(SocketAddr),
}

impl Endpoint {
    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Udp(addr) => write!(f, "udp://{addr}"),
        }
    }
}

/// Local endpoint to bind plus the default peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Where to bind. `None` binds an anonymous socket of the peer's family.
    pub local: Option<Endpoint>,
    /// Default destination for `send`
    pub remote: Option<Endpoint>,
}

impl Binding {
    pub fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self {
            local: Some(local),
            remote: Some(remote),
        }
    }

    /// A server binding with no peer until one sends.
    pub fn listen(local: Endpoint) -> Self {
        Self {
            local: Some(local),
            remote: None,
        }
    }

    /// An anonymous client binding.
    pub fn connect(remote: Endpoint) -> Self {
        Self {
            local: None,
            remote: Some(remote),
        }
    }
}

/// How the destination of `send` is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    /// Reply to whoever sent last, falling back to the configured peer.
    Server,
    /// Always send to the configured peer.
    Client,
}

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    /// Sender address. Unbound Unix senders have none.
    pub from: Option<Endpoint>,
}

/// Errors raised while setting up a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Cannot resolve {host}: {error}")]
    Resolve { host: String, error: String },

    #[error("Binding has neither a local nor a remote endpoint")]
    NoEndpoint,
}

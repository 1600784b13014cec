//! PRiME API - Process-side runtime for Apps, Devices and UIs
//!
//! This crate connects one process to the rest of the control plane:
//! - `transport` - Unix datagram / UDP endpoints with a receive task
//! - `directory` - default addressing and the shared `InterfaceConfig`
//! - `waiter` - request ids mapped to pending callers
//! - `app` - App registration, knobs and monitors
//! - `device` - Device tables served to the runtime manager
//! - `ui` - UI side channels for Apps and Devices
//! - `logger` - the logger sink
//!
//! ```text
//!   App ──────▶ RTM ──────▶ Device
//!    │           │            │
//!    └───────────┴────────────┴──▶ logger / UI mirrors
//! ```
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod app;
pub mod device;
pub mod directory;
pub mod error;
pub mod logger;
pub mod mirror;
pub mod transport;
pub mod ui;
pub mod waiter;

// Re-exports for convenience
pub use app::AppInterface;
pub use device::DeviceInterface;
pub use directory::{
    ChannelAddr, ConfigError, Directory, InterfaceConfig, DEFAULT_LOGGER_PORT, DEFAULT_SOCKET_DIR,
};
pub use error::{ApiError, ApiResult};
pub use logger::{LogEntry, LogRecord, LoggerSink};
pub use mirror::Mirror;
pub use transport::{Binding, Datagram, Endpoint, Inbox, PeerMode, Transport, TransportError};
pub use ui::{AppUiCommand, AppUiInterface, DeviceUiCommand, DeviceUiInterface, UiChannel};
pub use waiter::{PendingRequests, Reply, WaitError, Waiter};

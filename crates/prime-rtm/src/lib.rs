//! PRiME RTM - Runtime manager side of the control plane
//!
//! - `apps` - the App registry actor: rendezvous, per-App fan-out endpoints,
//!   session leases, knob and monitor tables
//! - `device` - client of the single Device
//! - `ui` - the RTM's UI side channel
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod apps;
pub mod device;
pub mod ui;

pub use apps::{
    spawn_app_registry, AppEvent, AppRegistryHandle, DeregisterReason, RegistryError, SessionView,
};
pub use device::RtmDeviceInterface;
pub use ui::{RtmUiCommand, RtmUiInterface};

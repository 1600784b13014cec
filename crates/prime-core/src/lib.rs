//! PRiME Core - Shared domain types for the control plane
//!
//! This crate provides the types shared by Apps, Devices and the runtime
//! manager:
//! - `value` - discrete/continuous scalar domains and the erased `Value`
//! - `types` - semantic type tags for knobs and monitors
//! - `knob` - knob and monitor containers
//! - `packed_id` - hierarchical device addresses
//! - `arch` - the device architecture document and its queries
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod arch;
pub mod error;
pub mod knob;
pub mod packed_id;
pub mod time;
pub mod types;
pub mod value;

// Re-exports for convenience
pub use arch::{of_type, ArchEntry, DeviceArchitecture, DeviceEntry, EntryGroup, FunctionalUnit, SubUnit};
pub use error::{DomainError, DomainResult};
pub use knob::{AppKnob, AppMonitor, DeviceKnob, DeviceMonitor, MonitorReading};
pub use packed_id::PackedId;
pub use time::{now_micros, to_datetime, Timestamp};
pub use types::{AppKnobType, AppMonitorType, DeviceKnobType, DeviceMonitorType};
pub use value::{Cont, Disc, Scalar, ScalarKind, Value};

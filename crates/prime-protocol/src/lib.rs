//! PRiME Protocol - Wire codec for the control plane
//!
//! Two encodings share every channel:
//!
//! ```text
//! fast path:  <tag>¿<field>¿<field>...¿<ts>          one ASCII tag byte, '¿'-delimited
//! slow path:  {"ts":..,"type":"PRIME_..","req":..,"data":..}   one JSON document
//! ```
//!
//! [`Frame::decode`] picks the path from the first byte. Decoding never
//! panics; malformed input becomes a [`ProtocolError`] and the caller drops
//! the datagram.

pub mod error;
pub mod fast;
pub mod frame;
pub mod message;
pub mod message_type;
pub mod parse;
pub mod request;
pub mod tag;

pub use error::{ProtocolError, ProtocolResult};
pub use fast::{parse_f32, parse_value, Bound, FastFrame, DELIMITER};
pub use frame::Frame;
pub use message::{DeviceEntryRef, KnobRegistration, MonitorRegistration, SlowFrame, SlowMessage};
pub use message_type::MessageType;
pub use parse::WireNumber;
pub use request::{RequestId, RequestIdGenerator};
pub use tag::FastTag;

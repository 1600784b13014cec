//! Slow-path messages.
//!
//! A slow-path frame is one JSON document:
//!
//! ```text
//! { "ts": <micros>, "type": "<MessageType>", "req": <id, optional>, "data": <payload> }
//! ```
//!
//! `data` is usually an object, but size replies carry a bare number, table
//! replies carry an array and the architecture reply carries a path string.

use prime_core::{
    now_micros, AppKnob, AppKnobType, AppMonitor, AppMonitorType, DeviceKnob, DeviceKnobType,
    DeviceMonitor, DeviceMonitorType, PackedId, ScalarKind, Timestamp, Value,
};
use serde::Serialize;
use serde_json::{json, Value as Json};

use crate::error::{ProtocolError, ProtocolResult};
use crate::fast::Bound;
use crate::message_type::MessageType;
use crate::request::RequestId;

// ============================================================================
// Payload Records
// ============================================================================

/// An App's request to register a knob. The RTM fills in the id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnobRegistration {
    pub proc_id: u32,
    pub knob_type: AppKnobType,
    pub min: Value,
    pub max: Value,
    pub val: Value,
}

impl KnobRegistration {
    pub fn kind(&self) -> ScalarKind {
        self.val.kind()
    }
}

/// An App's request to register a monitor. Monitors start at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorRegistration {
    pub proc_id: u32,
    pub mon_type: AppMonitorType,
    pub min: Value,
    pub max: Value,
    pub weight: f32,
}

impl MonitorRegistration {
    pub fn kind(&self) -> ScalarKind {
        self.min.kind()
    }
}

/// Id and type of a device entry, as listed in a device deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceEntryRef<T> {
    pub id: PackedId,
    #[serde(rename = "type")]
    pub entry_type: T,
}

// ============================================================================
// Slow Message
// ============================================================================

/// Every slow-path payload, typed.
#[derive(Debug, Clone, PartialEq)]
pub enum SlowMessage {
    // App lifecycle
    AppRegister { proc_id: u32, ur_id: u64 },
    AppRegisterReturn { proc_id: u32 },
    AppDeregister { proc_id: u32 },
    AppDeregisterReturn { proc_id: u32 },
    /// Renews the App's session lease at the RTM.
    AppHeartbeat { proc_id: u32 },

    // App knobs and monitors
    KnobRegister(KnobRegistration),
    KnobRegisterReturn(AppKnob),
    KnobDeregister(AppKnob),
    MonitorRegister(MonitorRegistration),
    MonitorRegisterReturn(AppMonitor),
    MonitorDeregister(AppMonitor),

    // Device tables
    DeviceKnobSize(ScalarKind),
    DeviceKnobSizeReturn { kind: ScalarKind, size: u32 },
    DeviceMonitorSize(ScalarKind),
    DeviceMonitorSizeReturn { kind: ScalarKind, size: u32 },
    DeviceKnobRegister(ScalarKind),
    DeviceKnobRegisterReturn { kind: ScalarKind, knobs: Vec<DeviceKnob> },
    DeviceMonitorRegister(ScalarKind),
    DeviceMonitorRegisterReturn { kind: ScalarKind, mons: Vec<DeviceMonitor> },
    DeviceKnobDeregister { kind: ScalarKind, knobs: Vec<DeviceEntryRef<DeviceKnobType>> },
    DeviceMonitorDeregister { kind: ScalarKind, mons: Vec<DeviceEntryRef<DeviceMonitorType>> },
    ArchGet,
    /// Path of the architecture document on the Device's host.
    ArchGetReturn { path: String },

    // UI <-> App
    UiAppRegister { proc_id: u32 },
    UiAppDeregister { proc_id: u32 },
    UiMonitorBound { kind: ScalarKind, bound: Bound, id: u32, val: Value },
    UiMonitorWeight { kind: ScalarKind, id: u32, weight: f32 },
    UiAppStop { proc_id: u32 },
    UiAppStarted { proc_id: u32 },
    UiAppStopped { proc_id: u32 },
    UiAppError { proc_id: u32, msg: String },

    // UI <-> Device
    UiDeviceStop,
    UiDeviceStarted,
    UiDeviceStopped,
    UiDeviceError { msg: String },

    // UI <-> RTM
    UiRtmStop,
    UiAppWeight { proc_id: u32, weight: f32 },
    UiRtmStarted,
    UiRtmStopped,
    UiRtmError { msg: String },
}

fn by_kind(kind: ScalarKind, disc: MessageType, cont: MessageType) -> MessageType {
    match kind {
        ScalarKind::Discrete => disc,
        ScalarKind::Continuous => cont,
    }
}

fn to_json<T: Serialize>(value: &T) -> ProtocolResult<Json> {
    serde_json::to_value(value).map_err(ProtocolError::json)
}

impl SlowMessage {
    /// Type string this message travels under.
    pub fn message_type(&self) -> MessageType {
        use MessageType as T;
        match self {
            Self::AppRegister { .. } => T::AppReg,
            Self::AppRegisterReturn { .. } => T::AppReturnAppReg,
            Self::AppDeregister { .. } => T::AppDereg,
            Self::AppDeregisterReturn { .. } => T::AppReturnAppDereg,
            Self::AppHeartbeat { .. } => T::AppHeartbeat,
            Self::KnobRegister(r) => by_kind(r.kind(), T::AppKnobDiscReg, T::AppKnobContReg),
            Self::KnobRegisterReturn(k) => {
                by_kind(k.kind(), T::AppReturnKnobDiscReg, T::AppReturnKnobContReg)
            }
            Self::KnobDeregister(k) => by_kind(k.kind(), T::AppKnobDiscDereg, T::AppKnobContDereg),
            Self::MonitorRegister(r) => by_kind(r.kind(), T::AppMonDiscReg, T::AppMonContReg),
            Self::MonitorRegisterReturn(m) => {
                by_kind(m.kind(), T::AppReturnMonDiscReg, T::AppReturnMonContReg)
            }
            Self::MonitorDeregister(m) => by_kind(m.kind(), T::AppMonDiscDereg, T::AppMonContDereg),
            Self::DeviceKnobSize(k) => by_kind(*k, T::DevKnobDiscSize, T::DevKnobContSize),
            Self::DeviceKnobSizeReturn { kind, .. } => {
                by_kind(*kind, T::DevReturnKnobDiscSize, T::DevReturnKnobContSize)
            }
            Self::DeviceMonitorSize(k) => by_kind(*k, T::DevMonDiscSize, T::DevMonContSize),
            Self::DeviceMonitorSizeReturn { kind, .. } => {
                by_kind(*kind, T::DevReturnMonDiscSize, T::DevReturnMonContSize)
            }
            Self::DeviceKnobRegister(k) => by_kind(*k, T::DevKnobDiscReg, T::DevKnobContReg),
            Self::DeviceKnobRegisterReturn { kind, .. } => {
                by_kind(*kind, T::DevReturnKnobDiscReg, T::DevReturnKnobContReg)
            }
            Self::DeviceMonitorRegister(k) => by_kind(*k, T::DevMonDiscReg, T::DevMonContReg),
            Self::DeviceMonitorRegisterReturn { kind, .. } => {
                by_kind(*kind, T::DevReturnMonDiscReg, T::DevReturnMonContReg)
            }
            Self::DeviceKnobDeregister { kind, .. } => {
                by_kind(*kind, T::DevKnobDiscDereg, T::DevKnobContDereg)
            }
            Self::DeviceMonitorDeregister { kind, .. } => {
                by_kind(*kind, T::DevMonDiscDereg, T::DevMonContDereg)
            }
            Self::ArchGet => T::DevArchGet,
            Self::ArchGetReturn { .. } => T::DevReturnArchGet,
            Self::UiAppRegister { .. } => T::UiAppReg,
            Self::UiAppDeregister { .. } => T::UiAppDereg,
            Self::UiMonitorBound { kind, bound, .. } => match (kind, bound) {
                (ScalarKind::Discrete, Bound::Min) => T::UiAppMonDiscMin,
                (ScalarKind::Discrete, Bound::Max) => T::UiAppMonDiscMax,
                (ScalarKind::Continuous, Bound::Min) => T::UiAppMonContMin,
                (ScalarKind::Continuous, Bound::Max) => T::UiAppMonContMax,
            },
            Self::UiMonitorWeight { kind, .. } => {
                by_kind(*kind, T::UiAppMonDiscWeight, T::UiAppMonContWeight)
            }
            Self::UiAppStop { .. } => T::UiAppStop,
            Self::UiAppStarted { .. } => T::UiAppReturnAppStart,
            Self::UiAppStopped { .. } => T::UiAppReturnAppStop,
            Self::UiAppError { .. } => T::UiAppError,
            Self::UiDeviceStop => T::UiDevStop,
            Self::UiDeviceStarted => T::UiDevReturnDevStart,
            Self::UiDeviceStopped => T::UiDevReturnDevStop,
            Self::UiDeviceError { .. } => T::UiDevError,
            Self::UiRtmStop => T::UiRtmStop,
            Self::UiAppWeight { .. } => T::UiAppWeight,
            Self::UiRtmStarted => T::UiRtmReturnRtmStart,
            Self::UiRtmStopped => T::UiRtmReturnRtmStop,
            Self::UiRtmError { .. } => T::UiRtmError,
        }
    }

    /// Builds the `data` payload.
    pub fn data(&self) -> ProtocolResult<Json> {
        let data = match self {
            Self::AppRegister { proc_id, ur_id } => json!({ "proc_id": proc_id, "ur_id": ur_id }),
            Self::AppRegisterReturn { proc_id }
            | Self::AppDeregister { proc_id }
            | Self::AppDeregisterReturn { proc_id }
            | Self::AppHeartbeat { proc_id }
            | Self::UiAppRegister { proc_id }
            | Self::UiAppDeregister { proc_id }
            | Self::UiAppStop { proc_id }
            | Self::UiAppStarted { proc_id }
            | Self::UiAppStopped { proc_id } => json!({ "proc_id": proc_id }),
            Self::KnobRegister(r) => json!({
                "proc_id": r.proc_id,
                "type": r.knob_type,
                "min": r.min,
                "max": r.max,
                "val": r.val,
            }),
            Self::KnobRegisterReturn(knob) | Self::KnobDeregister(knob) => {
                json!({ "knob": to_json(knob)? })
            }
            Self::MonitorRegister(r) => json!({
                "proc_id": r.proc_id,
                "type": r.mon_type,
                "min": r.min,
                "max": r.max,
                "weight": Value::Cont(r.weight),
            }),
            Self::MonitorRegisterReturn(mon) | Self::MonitorDeregister(mon) => {
                json!({ "mon": to_json(mon)? })
            }
            Self::DeviceKnobSize(_)
            | Self::DeviceMonitorSize(_)
            | Self::DeviceKnobRegister(_)
            | Self::DeviceMonitorRegister(_)
            | Self::ArchGet
            | Self::UiDeviceStop
            | Self::UiDeviceStarted
            | Self::UiDeviceStopped
            | Self::UiRtmStop
            | Self::UiRtmStarted
            | Self::UiRtmStopped => json!({}),
            Self::DeviceKnobSizeReturn { size, .. } | Self::DeviceMonitorSizeReturn { size, .. } => {
                json!(size)
            }
            Self::DeviceKnobRegisterReturn { knobs, .. } => to_json(knobs)?,
            Self::DeviceMonitorRegisterReturn { mons, .. } => to_json(mons)?,
            Self::DeviceKnobDeregister { knobs, .. } => json!({ "knobs": to_json(knobs)? }),
            Self::DeviceMonitorDeregister { mons, .. } => json!({ "mons": to_json(mons)? }),
            Self::ArchGetReturn { path } => json!(path),
            Self::UiMonitorBound { bound, id, val, .. } => match bound {
                Bound::Min => json!({ "id": id, "min": val }),
                Bound::Max => json!({ "id": id, "max": val }),
            },
            Self::UiMonitorWeight { id, weight, .. } => {
                json!({ "id": id, "weight": Value::Cont(*weight) })
            }
            Self::UiAppError { proc_id, msg } => json!({ "proc_id": proc_id, "msg": msg }),
            Self::UiDeviceError { msg } | Self::UiRtmError { msg } => json!({ "msg": msg }),
            Self::UiAppWeight { proc_id, weight } => {
                json!({ "proc_id": proc_id, "weight": Value::Cont(*weight) })
            }
        };
        Ok(data)
    }
}

// ============================================================================
// Slow Frame
// ============================================================================

/// A slow-path document: envelope plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowFrame {
    /// Sender timestamp in microseconds
    pub ts: Timestamp,
    /// Correlation id for request/response pairs
    pub req: Option<RequestId>,
    pub message: SlowMessage,
}

impl SlowFrame {
    /// Wraps a one-way message, stamped now.
    pub fn new(message: SlowMessage) -> Self {
        Self {
            ts: now_micros(),
            req: None,
            message,
        }
    }

    /// Wraps a request or response, stamped now.
    pub fn with_req(message: SlowMessage, req: RequestId) -> Self {
        Self {
            ts: now_micros(),
            req: Some(req),
            message,
        }
    }

    /// Serializes the document.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut doc = json!({
            "ts": self.ts,
            "type": self.message.message_type().as_str(),
            "data": self.message.data()?,
        });
        if let (Some(req), Some(obj)) = (self.req, doc.as_object_mut()) {
            obj.insert("req".to_string(), json!(req.get()));
        }
        serde_json::to_vec(&doc).map_err(ProtocolError::json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let frame = SlowFrame {
            ts: 12,
            req: Some(RequestId::new(3)),
            message: SlowMessage::AppRegister {
                proc_id: 100,
                ur_id: 7,
            },
        };
        let doc: Json = serde_json::from_slice(&frame.encode().unwrap()).unwrap();
        assert_eq!(doc["ts"], 12);
        assert_eq!(doc["type"], "PRIME_API_APP_REG");
        assert_eq!(doc["req"], 3);
        assert_eq!(doc["data"]["proc_id"], 100);
        assert_eq!(doc["data"]["ur_id"], 7);
    }

    #[test]
    fn test_one_way_frames_omit_req() {
        let frame = SlowFrame::new(SlowMessage::AppHeartbeat { proc_id: 1 });
        let doc: Json = serde_json::from_slice(&frame.encode().unwrap()).unwrap();
        assert!(doc.get("req").is_none());
        assert_eq!(doc["type"], "PRIME_API_APP_HEARTBEAT");
    }

    #[test]
    fn test_unbounded_knob_encodes_inf_strings() {
        let msg = SlowMessage::KnobRegister(KnobRegistration {
            proc_id: 1,
            knob_type: AppKnobType::Precision,
            min: Value::Cont(f32::NEG_INFINITY),
            max: Value::Cont(f32::INFINITY),
            val: Value::Cont(0.5),
        });
        assert_eq!(msg.message_type(), MessageType::AppKnobContReg);
        let data = msg.data().unwrap();
        assert_eq!(data["min"], "-inf");
        assert_eq!(data["max"], "inf");
        assert_eq!(data["type"], 1);
    }

    #[test]
    fn test_table_and_scalar_payloads() {
        let msg = SlowMessage::DeviceKnobSizeReturn {
            kind: ScalarKind::Discrete,
            size: 4,
        };
        assert_eq!(msg.data().unwrap(), json!(4));
        assert_eq!(msg.message_type(), MessageType::DevReturnKnobDiscSize);

        let msg = SlowMessage::DeviceMonitorRegisterReturn {
            kind: ScalarKind::Continuous,
            mons: Vec::new(),
        };
        assert_eq!(msg.data().unwrap(), json!([]));
        assert_eq!(msg.message_type(), MessageType::DevReturnMonContReg);

        let msg = SlowMessage::ArchGetReturn {
            path: "/etc/arch.json".to_string(),
        };
        assert_eq!(msg.data().unwrap(), json!("/etc/arch.json"));
    }

    #[test]
    fn test_ui_bound_uses_bound_name_as_key() {
        let msg = SlowMessage::UiMonitorBound {
            kind: ScalarKind::Discrete,
            bound: Bound::Max,
            id: 2,
            val: Value::Disc(9),
        };
        assert_eq!(msg.message_type(), MessageType::UiAppMonDiscMax);
        assert_eq!(msg.data().unwrap(), json!({ "id": 2, "max": 9 }));
    }
}

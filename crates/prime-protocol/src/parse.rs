//! Parsing slow-path documents.
//!
//! Peers disagree on how numbers travel: some write JSON numbers, some write
//! every scalar as a string, and unbounded extremes always arrive as
//! `"inf"`/`"-inf"`. [`WireNumber`] accepts all of these and the value domain
//! is taken from the message type, never guessed from the payload.

use std::str::FromStr;

use prime_core::{
    AppKnob, AppKnobType, AppMonitor, AppMonitorType, DeviceKnob, DeviceKnobType, DeviceMonitor,
    DeviceMonitorType, PackedId, ScalarKind, Value,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::{ProtocolError, ProtocolResult};
use crate::fast::{parse_f32, parse_value, Bound};
use crate::message::{
    DeviceEntryRef, KnobRegistration, MonitorRegistration, SlowFrame, SlowMessage,
};
use crate::message_type::MessageType;
use crate::request::RequestId;

// ============================================================================
// Wire Numbers
// ============================================================================

/// A numeric field as it may appear in a document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireNumber {
    /// Interprets the field in the given value domain.
    pub fn to_value(&self, kind: ScalarKind) -> Option<Value> {
        match (self, kind) {
            (Self::Int(v), ScalarKind::Discrete) => i32::try_from(*v).ok().map(Value::Disc),
            (Self::Int(v), ScalarKind::Continuous) => Some(Value::Cont(*v as f32)),
            (Self::Float(v), ScalarKind::Discrete) => {
                if v.is_infinite() {
                    Some(Value::Disc(if *v > 0.0 { i32::MAX } else { i32::MIN }))
                } else if v.fract() == 0.0 && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX) {
                    Some(Value::Disc(*v as i32))
                } else {
                    None
                }
            }
            (Self::Float(v), ScalarKind::Continuous) => Some(Value::Cont(*v as f32)),
            (Self::Text(s), kind) => parse_value(s.trim(), kind),
        }
    }

    pub fn to_f32(&self) -> Option<f32> {
        match self {
            Self::Int(v) => Some(*v as f32),
            Self::Float(v) => Some(*v as f32),
            Self::Text(s) => parse_f32(s.trim()),
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u64),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn to_u32(&self) -> Option<u32> {
        self.to_u64().and_then(|v| u32::try_from(v).ok())
    }
}

// ============================================================================
// Raw Payload Records
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    ts: Option<WireNumber>,
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    req: Option<WireNumber>,
    #[serde(default)]
    data: Json,
}

#[derive(Debug, Clone, Deserialize)]
struct RawProcId {
    proc_id: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAppReg {
    proc_id: WireNumber,
    #[serde(default)]
    ur_id: Option<WireNumber>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawKnobReg {
    proc_id: WireNumber,
    #[serde(rename = "type")]
    knob_type: WireNumber,
    min: WireNumber,
    max: WireNumber,
    val: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMonReg {
    proc_id: WireNumber,
    #[serde(rename = "type")]
    mon_type: WireNumber,
    min: WireNumber,
    max: WireNumber,
    #[serde(default)]
    weight: Option<WireNumber>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAppKnob {
    proc_id: WireNumber,
    id: WireNumber,
    #[serde(rename = "type")]
    knob_type: WireNumber,
    min: WireNumber,
    max: WireNumber,
    val: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAppMon {
    proc_id: WireNumber,
    id: WireNumber,
    #[serde(rename = "type")]
    mon_type: WireNumber,
    min: WireNumber,
    max: WireNumber,
    #[serde(default)]
    val: Option<WireNumber>,
    #[serde(default)]
    weight: Option<WireNumber>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawKnobWrap {
    knob: RawAppKnob,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMonWrap {
    mon: RawAppMon,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDevKnob {
    id: WireNumber,
    #[serde(rename = "type")]
    knob_type: WireNumber,
    min: WireNumber,
    max: WireNumber,
    val: WireNumber,
    #[serde(default)]
    init: Option<WireNumber>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDevMon {
    id: WireNumber,
    #[serde(rename = "type")]
    mon_type: WireNumber,
    min: WireNumber,
    max: WireNumber,
    val: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEntryRef {
    id: WireNumber,
    #[serde(rename = "type")]
    entry_type: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDevKnobRefs {
    #[serde(default)]
    knobs: Vec<RawEntryRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDevMonRefs {
    #[serde(default)]
    mons: Vec<RawEntryRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawUiBound {
    id: WireNumber,
    #[serde(default)]
    min: Option<WireNumber>,
    #[serde(default)]
    max: Option<WireNumber>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawUiWeight {
    #[serde(default)]
    id: Option<WireNumber>,
    #[serde(default)]
    proc_id: Option<WireNumber>,
    weight: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
struct RawUiError {
    #[serde(default)]
    proc_id: Option<WireNumber>,
    #[serde(default)]
    msg: String,
}

// ============================================================================
// Field Conversion
// ============================================================================

/// Payload decoder bound to one message type, for error context.
struct Payload<'a> {
    msg_type: MessageType,
    data: &'a Json,
}

impl Payload<'_> {
    fn err(&self, reason: impl std::fmt::Display) -> ProtocolError {
        ProtocolError::payload(self.msg_type, reason)
    }

    fn record<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        T::deserialize(self.data).map_err(|e| self.err(e))
    }

    /// Decodes an array payload. Peers that serialize an empty table as
    /// `""` or `null` produce an empty list.
    fn list<T: DeserializeOwned>(&self) -> ProtocolResult<Vec<T>> {
        match self.data {
            Json::Null => Ok(Vec::new()),
            Json::String(s) if s.is_empty() => Ok(Vec::new()),
            Json::Object(map) if map.is_empty() => Ok(Vec::new()),
            other => Vec::<T>::deserialize(other).map_err(|e| self.err(e)),
        }
    }

    fn u32(&self, field: &'static str, raw: &WireNumber) -> ProtocolResult<u32> {
        raw.to_u32()
            .ok_or_else(|| self.err(format!("{field} is not an unsigned integer")))
    }

    fn f32(&self, field: &'static str, raw: &WireNumber) -> ProtocolResult<f32> {
        raw.to_f32()
            .ok_or_else(|| self.err(format!("{field} is not a number")))
    }

    fn value(&self, field: &'static str, raw: &WireNumber, kind: ScalarKind) -> ProtocolResult<Value> {
        raw.to_value(kind)
            .ok_or_else(|| self.err(format!("{field} is not a {kind} value")))
    }

    fn ordinal<T: TryFrom<u32>>(&self, raw: &WireNumber) -> ProtocolResult<T> {
        let ord = self.u32("type", raw)?;
        T::try_from(ord).map_err(|_| self.err(format!("unknown type ordinal {ord}")))
    }

    fn proc_id(&self) -> ProtocolResult<u32> {
        let raw: RawProcId = self.record()?;
        self.u32("proc_id", &raw.proc_id)
    }

    fn app_knob(&self, raw: &RawAppKnob, kind: ScalarKind) -> ProtocolResult<AppKnob> {
        Ok(AppKnob {
            proc_id: self.u32("proc_id", &raw.proc_id)?,
            id: self.u32("id", &raw.id)?,
            knob_type: self.ordinal::<AppKnobType>(&raw.knob_type)?,
            min: self.value("min", &raw.min, kind)?,
            max: self.value("max", &raw.max, kind)?,
            val: self.value("val", &raw.val, kind)?,
        })
    }

    fn app_monitor(&self, raw: &RawAppMon, kind: ScalarKind) -> ProtocolResult<AppMonitor> {
        let val = match &raw.val {
            Some(v) => self.value("val", v, kind)?,
            None => Value::zero(kind),
        };
        let weight = match &raw.weight {
            Some(w) => self.f32("weight", w)?,
            None => 1.0,
        };
        Ok(AppMonitor {
            proc_id: self.u32("proc_id", &raw.proc_id)?,
            id: self.u32("id", &raw.id)?,
            mon_type: self.ordinal::<AppMonitorType>(&raw.mon_type)?,
            min: self.value("min", &raw.min, kind)?,
            max: self.value("max", &raw.max, kind)?,
            val,
            weight,
        })
    }

    fn device_knob(&self, raw: &RawDevKnob, kind: ScalarKind) -> ProtocolResult<DeviceKnob> {
        let val = self.value("val", &raw.val, kind)?;
        let init = match &raw.init {
            Some(i) => self.value("init", i, kind)?,
            None => val,
        };
        Ok(DeviceKnob {
            id: PackedId::unpack(self.u32("id", &raw.id)?),
            knob_type: self.ordinal::<DeviceKnobType>(&raw.knob_type)?,
            min: self.value("min", &raw.min, kind)?,
            max: self.value("max", &raw.max, kind)?,
            val,
            init,
        })
    }

    fn device_monitor(&self, raw: &RawDevMon, kind: ScalarKind) -> ProtocolResult<DeviceMonitor> {
        Ok(DeviceMonitor {
            id: PackedId::unpack(self.u32("id", &raw.id)?),
            mon_type: self.ordinal::<DeviceMonitorType>(&raw.mon_type)?,
            min: self.value("min", &raw.min, kind)?,
            max: self.value("max", &raw.max, kind)?,
            val: self.value("val", &raw.val, kind)?,
        })
    }

    fn entry_ref<T: TryFrom<u32>>(&self, raw: &RawEntryRef) -> ProtocolResult<DeviceEntryRef<T>> {
        Ok(DeviceEntryRef {
            id: PackedId::unpack(self.u32("id", &raw.id)?),
            entry_type: self.ordinal::<T>(&raw.entry_type)?,
        })
    }

    fn size(&self) -> ProtocolResult<u32> {
        let raw = WireNumber::deserialize(self.data).map_err(|e| self.err(e))?;
        self.u32("size", &raw)
    }

    fn text(&self) -> ProtocolResult<String> {
        self.data
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.err("expected a string"))
    }

    fn ui_bound(&self, kind: ScalarKind, bound: Bound) -> ProtocolResult<SlowMessage> {
        let raw: RawUiBound = self.record()?;
        let (field, val) = match bound {
            Bound::Min => ("min", raw.min.as_ref()),
            Bound::Max => ("max", raw.max.as_ref()),
        };
        let val = val.ok_or_else(|| self.err(format!("missing field `{field}`")))?;
        Ok(SlowMessage::UiMonitorBound {
            kind,
            bound,
            id: self.u32("id", &raw.id)?,
            val: self.value(field, val, kind)?,
        })
    }

    fn ui_weight(&self, kind: ScalarKind) -> ProtocolResult<SlowMessage> {
        let raw: RawUiWeight = self.record()?;
        let id = raw.id.as_ref().ok_or_else(|| self.err("missing field `id`"))?;
        Ok(SlowMessage::UiMonitorWeight {
            kind,
            id: self.u32("id", id)?,
            weight: self.f32("weight", &raw.weight)?,
        })
    }
}

// ============================================================================
// Dispatch
// ============================================================================

fn decode_message(msg_type: MessageType, data: &Json) -> ProtocolResult<SlowMessage> {
    use MessageType as T;
    use ScalarKind::{Continuous as Cont, Discrete as Disc};

    let p = Payload { msg_type, data };

    let knob_reg = |kind: ScalarKind| -> ProtocolResult<SlowMessage> {
        let raw: RawKnobReg = p.record()?;
        Ok(SlowMessage::KnobRegister(KnobRegistration {
            proc_id: p.u32("proc_id", &raw.proc_id)?,
            knob_type: p.ordinal(&raw.knob_type)?,
            min: p.value("min", &raw.min, kind)?,
            max: p.value("max", &raw.max, kind)?,
            val: p.value("val", &raw.val, kind)?,
        }))
    };
    let mon_reg = |kind: ScalarKind| -> ProtocolResult<SlowMessage> {
        let raw: RawMonReg = p.record()?;
        let weight = match &raw.weight {
            Some(w) => p.f32("weight", w)?,
            None => 1.0,
        };
        Ok(SlowMessage::MonitorRegister(MonitorRegistration {
            proc_id: p.u32("proc_id", &raw.proc_id)?,
            mon_type: p.ordinal(&raw.mon_type)?,
            min: p.value("min", &raw.min, kind)?,
            max: p.value("max", &raw.max, kind)?,
            weight,
        }))
    };
    let knob_wrap = |kind: ScalarKind| -> ProtocolResult<AppKnob> {
        let raw: RawKnobWrap = p.record()?;
        p.app_knob(&raw.knob, kind)
    };
    let mon_wrap = |kind: ScalarKind| -> ProtocolResult<AppMonitor> {
        let raw: RawMonWrap = p.record()?;
        p.app_monitor(&raw.mon, kind)
    };
    let dev_knobs = |kind: ScalarKind| -> ProtocolResult<SlowMessage> {
        let raw: Vec<RawDevKnob> = p.list()?;
        let knobs = raw
            .iter()
            .map(|k| p.device_knob(k, kind))
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(SlowMessage::DeviceKnobRegisterReturn { kind, knobs })
    };
    let dev_mons = |kind: ScalarKind| -> ProtocolResult<SlowMessage> {
        let raw: Vec<RawDevMon> = p.list()?;
        let mons = raw
            .iter()
            .map(|m| p.device_monitor(m, kind))
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(SlowMessage::DeviceMonitorRegisterReturn { kind, mons })
    };
    let dev_knob_refs = |kind: ScalarKind| -> ProtocolResult<SlowMessage> {
        let raw: RawDevKnobRefs = p.record()?;
        let knobs = raw
            .knobs
            .iter()
            .map(|r| p.entry_ref(r))
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(SlowMessage::DeviceKnobDeregister { kind, knobs })
    };
    let dev_mon_refs = |kind: ScalarKind| -> ProtocolResult<SlowMessage> {
        let raw: RawDevMonRefs = p.record()?;
        let mons = raw
            .mons
            .iter()
            .map(|r| p.entry_ref(r))
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(SlowMessage::DeviceMonitorDeregister { kind, mons })
    };

    let msg = match msg_type {
        T::AppReg => {
            let raw: RawAppReg = p.record()?;
            let ur_id = match &raw.ur_id {
                Some(u) => u.to_u64().ok_or_else(|| p.err("ur_id is not an unsigned integer"))?,
                None => 0,
            };
            SlowMessage::AppRegister {
                proc_id: p.u32("proc_id", &raw.proc_id)?,
                ur_id,
            }
        }
        T::AppDereg => SlowMessage::AppDeregister { proc_id: p.proc_id()? },
        T::AppHeartbeat => SlowMessage::AppHeartbeat { proc_id: p.proc_id()? },
        T::AppReturnAppReg => SlowMessage::AppRegisterReturn { proc_id: p.proc_id()? },
        T::AppReturnAppDereg => SlowMessage::AppDeregisterReturn { proc_id: p.proc_id()? },
        T::AppKnobDiscReg => knob_reg(Disc)?,
        T::AppKnobContReg => knob_reg(Cont)?,
        T::AppReturnKnobDiscReg => SlowMessage::KnobRegisterReturn(knob_wrap(Disc)?),
        T::AppReturnKnobContReg => SlowMessage::KnobRegisterReturn(knob_wrap(Cont)?),
        T::AppKnobDiscDereg => SlowMessage::KnobDeregister(knob_wrap(Disc)?),
        T::AppKnobContDereg => SlowMessage::KnobDeregister(knob_wrap(Cont)?),
        T::AppMonDiscReg => mon_reg(Disc)?,
        T::AppMonContReg => mon_reg(Cont)?,
        T::AppReturnMonDiscReg => SlowMessage::MonitorRegisterReturn(mon_wrap(Disc)?),
        T::AppReturnMonContReg => SlowMessage::MonitorRegisterReturn(mon_wrap(Cont)?),
        T::AppMonDiscDereg => SlowMessage::MonitorDeregister(mon_wrap(Disc)?),
        T::AppMonContDereg => SlowMessage::MonitorDeregister(mon_wrap(Cont)?),

        T::DevKnobDiscSize => SlowMessage::DeviceKnobSize(Disc),
        T::DevKnobContSize => SlowMessage::DeviceKnobSize(Cont),
        T::DevReturnKnobDiscSize => SlowMessage::DeviceKnobSizeReturn { kind: Disc, size: p.size()? },
        T::DevReturnKnobContSize => SlowMessage::DeviceKnobSizeReturn { kind: Cont, size: p.size()? },
        T::DevKnobDiscReg => SlowMessage::DeviceKnobRegister(Disc),
        T::DevKnobContReg => SlowMessage::DeviceKnobRegister(Cont),
        T::DevReturnKnobDiscReg => dev_knobs(Disc)?,
        T::DevReturnKnobContReg => dev_knobs(Cont)?,
        T::DevKnobDiscDereg => dev_knob_refs(Disc)?,
        T::DevKnobContDereg => dev_knob_refs(Cont)?,
        T::DevMonDiscSize => SlowMessage::DeviceMonitorSize(Disc),
        T::DevMonContSize => SlowMessage::DeviceMonitorSize(Cont),
        T::DevReturnMonDiscSize => SlowMessage::DeviceMonitorSizeReturn { kind: Disc, size: p.size()? },
        T::DevReturnMonContSize => SlowMessage::DeviceMonitorSizeReturn { kind: Cont, size: p.size()? },
        T::DevMonDiscReg => SlowMessage::DeviceMonitorRegister(Disc),
        T::DevMonContReg => SlowMessage::DeviceMonitorRegister(Cont),
        T::DevReturnMonDiscReg => dev_mons(Disc)?,
        T::DevReturnMonContReg => dev_mons(Cont)?,
        T::DevMonDiscDereg => dev_mon_refs(Disc)?,
        T::DevMonContDereg => dev_mon_refs(Cont)?,
        T::DevArchGet => SlowMessage::ArchGet,
        T::DevReturnArchGet => SlowMessage::ArchGetReturn { path: p.text()? },

        T::UiAppReg => SlowMessage::UiAppRegister { proc_id: p.proc_id()? },
        T::UiAppDereg => SlowMessage::UiAppDeregister { proc_id: p.proc_id()? },
        T::UiAppMonDiscMin => p.ui_bound(Disc, Bound::Min)?,
        T::UiAppMonDiscMax => p.ui_bound(Disc, Bound::Max)?,
        T::UiAppMonDiscWeight => p.ui_weight(Disc)?,
        T::UiAppMonContMin => p.ui_bound(Cont, Bound::Min)?,
        T::UiAppMonContMax => p.ui_bound(Cont, Bound::Max)?,
        T::UiAppMonContWeight => p.ui_weight(Cont)?,
        T::UiAppStop => SlowMessage::UiAppStop { proc_id: p.proc_id()? },
        T::UiAppReturnAppStart => SlowMessage::UiAppStarted { proc_id: p.proc_id()? },
        T::UiAppReturnAppStop => SlowMessage::UiAppStopped { proc_id: p.proc_id()? },
        T::UiAppError => {
            let raw: RawUiError = p.record()?;
            let proc_id = match &raw.proc_id {
                Some(pid) => p.u32("proc_id", pid)?,
                None => 0,
            };
            SlowMessage::UiAppError { proc_id, msg: raw.msg }
        }

        T::UiDevStop => SlowMessage::UiDeviceStop,
        T::UiDevReturnDevStart => SlowMessage::UiDeviceStarted,
        T::UiDevReturnDevStop => SlowMessage::UiDeviceStopped,
        T::UiDevError => {
            let raw: RawUiError = p.record()?;
            SlowMessage::UiDeviceError { msg: raw.msg }
        }

        T::UiRtmStop => SlowMessage::UiRtmStop,
        T::UiAppWeight => {
            let raw: RawUiWeight = p.record()?;
            let proc_id = raw
                .proc_id
                .as_ref()
                .ok_or_else(|| p.err("missing field `proc_id`"))?;
            SlowMessage::UiAppWeight {
                proc_id: p.u32("proc_id", proc_id)?,
                weight: p.f32("weight", &raw.weight)?,
            }
        }
        T::UiRtmReturnRtmStart => SlowMessage::UiRtmStarted,
        T::UiRtmReturnRtmStop => SlowMessage::UiRtmStopped,
        T::UiRtmError => {
            let raw: RawUiError = p.record()?;
            SlowMessage::UiRtmError { msg: raw.msg }
        }
    };
    Ok(msg)
}

impl SlowFrame {
    /// Parses a slow-path document.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let envelope: RawEnvelope =
            serde_json::from_slice(bytes.get(..end).unwrap_or_default()).map_err(ProtocolError::json)?;
        let msg_type = MessageType::from_str(&envelope.msg_type)?;

        let ts = envelope
            .ts
            .as_ref()
            .and_then(WireNumber::to_u64)
            .unwrap_or(0);
        let req = envelope
            .req
            .as_ref()
            .and_then(WireNumber::to_u64)
            .map(RequestId::new);

        Ok(Self {
            ts,
            req,
            message: decode_message(msg_type, &envelope.data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(doc: Json) -> ProtocolResult<SlowFrame> {
        SlowFrame::decode(&serde_json::to_vec(&doc).unwrap())
    }

    #[test]
    fn test_wire_number_domains() {
        let inf = WireNumber::Text("inf".to_string());
        assert_eq!(inf.to_value(ScalarKind::Discrete), Some(Value::Disc(i32::MAX)));
        assert_eq!(inf.to_value(ScalarKind::Continuous), Some(Value::Cont(f32::INFINITY)));
        assert_eq!(
            WireNumber::Text("-inf".to_string()).to_value(ScalarKind::Continuous),
            Some(Value::Cont(f32::NEG_INFINITY))
        );
        assert_eq!(WireNumber::Int(5).to_value(ScalarKind::Continuous), Some(Value::Cont(5.0)));
        assert_eq!(WireNumber::Float(5.5).to_value(ScalarKind::Discrete), None);
        assert_eq!(WireNumber::Text("12".to_string()).to_u32(), Some(12));
        assert_eq!(WireNumber::Int(-1).to_u32(), None);
    }

    #[test]
    fn test_decode_register_with_string_numbers() {
        let frame = decode(json!({
            "ts": "55",
            "type": "PRIME_API_APP_KNOB_DISC_REG",
            "req": 4,
            "data": { "proc_id": "321", "type": "0", "min": "0", "max": "10", "val": "5" }
        }))
        .unwrap();
        assert_eq!(frame.ts, 55);
        assert_eq!(frame.req, Some(RequestId::new(4)));
        assert_eq!(
            frame.message,
            SlowMessage::KnobRegister(KnobRegistration {
                proc_id: 321,
                knob_type: AppKnobType::Parallelism,
                min: Value::Disc(0),
                max: Value::Disc(10),
                val: Value::Disc(5),
            })
        );
    }

    #[test]
    fn test_encode_decode_unbounded_knob_return() {
        let knob = AppKnob {
            proc_id: 9,
            id: 3,
            knob_type: AppKnobType::Iterations,
            min: Value::Disc(0),
            max: Value::Disc(i32::MAX),
            val: Value::Disc(100),
        };
        let frame = SlowFrame::with_req(SlowMessage::KnobRegisterReturn(knob), RequestId::new(8));
        let back = SlowFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_missing_field_is_payload_error() {
        let err = decode(json!({
            "ts": 1,
            "type": "PRIME_API_APP_MON_CONT_REG",
            "data": { "proc_id": 1, "type": 0, "min": 0 }
        }))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { .. }));
        assert!(err.to_string().contains("PRIME_API_APP_MON_CONT_REG"));
    }

    #[test]
    fn test_unknown_type_and_bad_json() {
        assert!(matches!(
            decode(json!({ "ts": 1, "type": "PRIME_NOPE", "data": {} })),
            Err(ProtocolError::UnknownType(_))
        ));
        assert!(matches!(
            SlowFrame::decode(b"{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_empty_table_spellings() {
        for data in [json!(""), json!(null), json!([]), json!({})] {
            let frame = decode(json!({
                "ts": 1,
                "type": "PRIME_API_DEV_RETURN_KNOB_CONT_REG",
                "data": data
            }))
            .unwrap();
            assert_eq!(
                frame.message,
                SlowMessage::DeviceKnobRegisterReturn {
                    kind: ScalarKind::Continuous,
                    knobs: Vec::new()
                }
            );
        }
    }

    #[test]
    fn test_device_table_and_dereg() {
        let frame = decode(json!({
            "ts": 1,
            "type": "PRIME_API_DEV_RETURN_MON_DISC_REG",
            "data": [ { "id": 65536, "type": 2, "min": 0, "max": "inf", "val": 17 } ]
        }))
        .unwrap();
        let SlowMessage::DeviceMonitorRegisterReturn { mons, .. } = frame.message else {
            panic!("wrong message");
        };
        assert_eq!(mons.len(), 1);
        assert_eq!(mons[0].id, PackedId::new(0, 1, 0, 0));
        assert_eq!(mons[0].max, Value::Disc(i32::MAX));

        let frame = decode(json!({
            "ts": 1,
            "type": "PRIME_API_DEV_KNOB_DISC_DEREG",
            "data": { "knobs": [ { "id": 1, "type": 1 } ] }
        }))
        .unwrap();
        assert_eq!(
            frame.message,
            SlowMessage::DeviceKnobDeregister {
                kind: ScalarKind::Discrete,
                knobs: vec![DeviceEntryRef {
                    id: PackedId::new(0, 0, 0, 1),
                    entry_type: DeviceKnobType::Frequency
                }]
            }
        );
    }

    #[test]
    fn test_ui_messages() {
        let frame = decode(json!({
            "ts": 1,
            "type": "PRIME_UI_APP_MON_CONT_MIN",
            "data": { "id": 4, "min": "-inf" }
        }))
        .unwrap();
        assert_eq!(
            frame.message,
            SlowMessage::UiMonitorBound {
                kind: ScalarKind::Continuous,
                bound: Bound::Min,
                id: 4,
                val: Value::Cont(f32::NEG_INFINITY)
            }
        );

        let frame = decode(json!({
            "ts": 1,
            "type": "PRIME_UI_APP_WEIGHT",
            "data": { "proc_id": 77, "weight": 2.5 }
        }))
        .unwrap();
        assert_eq!(frame.message, SlowMessage::UiAppWeight { proc_id: 77, weight: 2.5 });
    }

    #[test]
    fn test_trailing_nul_bytes() {
        let mut bytes = SlowFrame::new(SlowMessage::UiRtmStop).encode().unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(SlowFrame::decode(&bytes).unwrap().message, SlowMessage::UiRtmStop);
    }
}

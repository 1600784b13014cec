//! Fast-path frames.
//!
//! A fast-path frame is one tag byte followed by fixed fields, each preceded
//! by the delimiter `¿` (`C2 BF`). The last field is always the sender
//! timestamp in microseconds. Layouts by frame kind:
//!
//! ```text
//! knob get return     tag ¿ id ¿ val ¿ pid ¿ req ¿ ts
//! knob bound          tag ¿ id ¿ val ¿ pid ¿ ts
//! knob get            tag ¿ id ¿ pid ¿ req ¿ ts
//! monitor bound/set   tag ¿ id ¿ val ¿ pid ¿ ts
//! monitor weight      tag ¿ id ¿ weight ¿ pid ¿ ts
//! device knob set     tag ¿ id ¿ val ¿ ts
//! device monitor get  tag ¿ id ¿ req ¿ ts
//! device mon return   tag ¿ id ¿ val ¿ min ¿ max ¿ req ¿ ts
//! ```
//!
//! Values use their plain text form. Continuous extremes print as `inf` and
//! `-inf`; discrete extremes print as the `i32` limits. Decoders accept both
//! spellings for either domain.

use std::fmt::Write as _;

use prime_core::{MonitorReading, PackedId, ScalarKind, Timestamp, Value};

use crate::error::{ProtocolError, ProtocolResult};
use crate::request::RequestId;
use crate::tag::FastTag;

/// Field delimiter.
pub const DELIMITER: &str = "\u{00BF}";

/// Which bound a bound-change frame updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bound {
    Min,
    Max,
}

/// A decoded fast-path frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FastFrame {
    /// RTM answers an App's knob get.
    KnobGetReturn {
        id: u32,
        val: Value,
        proc_id: u32,
        req: RequestId,
        ts: Timestamp,
    },
    /// App changes a knob bound. The domain follows `val`.
    KnobBound {
        bound: Bound,
        id: u32,
        val: Value,
        proc_id: u32,
        ts: Timestamp,
    },
    /// App asks the RTM for a knob's current value.
    KnobGet {
        kind: ScalarKind,
        id: u32,
        proc_id: u32,
        req: RequestId,
        ts: Timestamp,
    },
    /// App changes a monitor bound.
    MonitorBound {
        bound: Bound,
        id: u32,
        val: Value,
        proc_id: u32,
        ts: Timestamp,
    },
    /// App changes a monitor weight. The weight itself is always continuous.
    MonitorWeight {
        kind: ScalarKind,
        id: u32,
        weight: f32,
        proc_id: u32,
        ts: Timestamp,
    },
    /// App pushes a new monitor value.
    MonitorSet {
        id: u32,
        val: Value,
        proc_id: u32,
        ts: Timestamp,
    },
    /// RTM sets a device knob.
    DeviceKnobSet {
        id: PackedId,
        val: Value,
        ts: Timestamp,
    },
    /// RTM asks a device for a monitor reading.
    DeviceMonitorGet {
        kind: ScalarKind,
        id: PackedId,
        req: RequestId,
        ts: Timestamp,
    },
    /// Device answers a monitor get with value and current bounds.
    DeviceMonitorReturn {
        id: PackedId,
        reading: MonitorReading<Value>,
        req: RequestId,
        ts: Timestamp,
    },
}

impl FastFrame {
    /// Tag byte selected by variant and value domain.
    pub fn tag(&self) -> FastTag {
        use ScalarKind::{Continuous, Discrete};
        match self {
            Self::KnobGetReturn { val, .. } => match val.kind() {
                Discrete => FastTag::KnobDiscGetReturn,
                Continuous => FastTag::KnobContGetReturn,
            },
            Self::KnobBound { bound, val, .. } => match (val.kind(), bound) {
                (Discrete, Bound::Min) => FastTag::KnobDiscMin,
                (Discrete, Bound::Max) => FastTag::KnobDiscMax,
                (Continuous, Bound::Min) => FastTag::KnobContMin,
                (Continuous, Bound::Max) => FastTag::KnobContMax,
            },
            Self::KnobGet { kind, .. } => match kind {
                Discrete => FastTag::KnobDiscGet,
                Continuous => FastTag::KnobContGet,
            },
            Self::MonitorBound { bound, val, .. } => match (val.kind(), bound) {
                (Discrete, Bound::Min) => FastTag::MonDiscMin,
                (Discrete, Bound::Max) => FastTag::MonDiscMax,
                (Continuous, Bound::Min) => FastTag::MonContMin,
                (Continuous, Bound::Max) => FastTag::MonContMax,
            },
            Self::MonitorWeight { kind, .. } => match kind {
                Discrete => FastTag::MonDiscWeight,
                Continuous => FastTag::MonContWeight,
            },
            Self::MonitorSet { val, .. } => match val.kind() {
                Discrete => FastTag::MonDiscSet,
                Continuous => FastTag::MonContSet,
            },
            Self::DeviceKnobSet { val, .. } => match val.kind() {
                Discrete => FastTag::DevKnobDiscSet,
                Continuous => FastTag::DevKnobContSet,
            },
            Self::DeviceMonitorGet { kind, .. } => match kind {
                Discrete => FastTag::DevMonDiscGet,
                Continuous => FastTag::DevMonContGet,
            },
            Self::DeviceMonitorReturn { reading, .. } => match reading.val.kind() {
                Discrete => FastTag::DevMonDiscGetReturn,
                Continuous => FastTag::DevMonContGetReturn,
            },
        }
    }

    /// Sender timestamp.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::KnobGetReturn { ts, .. }
            | Self::KnobBound { ts, .. }
            | Self::KnobGet { ts, .. }
            | Self::MonitorBound { ts, .. }
            | Self::MonitorWeight { ts, .. }
            | Self::MonitorSet { ts, .. }
            | Self::DeviceKnobSet { ts, .. }
            | Self::DeviceMonitorGet { ts, .. }
            | Self::DeviceMonitorReturn { ts, .. } => *ts,
        }
    }

    /// Correlation id, for request and response frames.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::KnobGetReturn { req, .. }
            | Self::KnobGet { req, .. }
            | Self::DeviceMonitorGet { req, .. }
            | Self::DeviceMonitorReturn { req, .. } => Some(*req),
            _ => None,
        }
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Serializes the frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::with_capacity(48);
        out.push(char::from(self.tag().as_byte()));
        let mut field = |s: &dyn std::fmt::Display| {
            out.push_str(DELIMITER);
            // Writing to a String cannot fail
            let _ = write!(out, "{s}");
        };

        match self {
            Self::KnobGetReturn { id, val, proc_id, req, ts } => {
                field(id);
                field(val);
                field(proc_id);
                field(req);
                field(ts);
            }
            Self::KnobBound { id, val, proc_id, ts, .. }
            | Self::MonitorBound { id, val, proc_id, ts, .. }
            | Self::MonitorSet { id, val, proc_id, ts } => {
                field(id);
                field(val);
                field(proc_id);
                field(ts);
            }
            Self::KnobGet { id, proc_id, req, ts, .. } => {
                field(id);
                field(proc_id);
                field(req);
                field(ts);
            }
            Self::MonitorWeight { id, weight, proc_id, ts, .. } => {
                field(id);
                field(weight);
                field(proc_id);
                field(ts);
            }
            Self::DeviceKnobSet { id, val, ts } => {
                field(&id.pack());
                field(val);
                field(ts);
            }
            Self::DeviceMonitorGet { id, req, ts, .. } => {
                field(&id.pack());
                field(req);
                field(ts);
            }
            Self::DeviceMonitorReturn { id, reading, req, ts } => {
                field(&id.pack());
                field(&reading.val);
                field(&reading.min);
                field(&reading.max);
                field(req);
                field(ts);
            }
        }
        out.into_bytes()
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Parses a fast-path frame.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        let text = text.trim_end_matches('\0');
        let mut parts = text.split(DELIMITER);

        let head = parts.next().unwrap_or_default();
        let tag = match head.as_bytes() {
            [byte] => FastTag::from_byte(*byte),
            _ => None,
        }
        .ok_or_else(|| ProtocolError::UnknownTag(head.chars().take(8).collect()))?;

        let fields: Vec<&str> = parts.collect();
        let mut f = Fields::new(tag, &fields)?;
        let kind = tag.kind();

        let frame = match tag {
            FastTag::KnobDiscGetReturn | FastTag::KnobContGetReturn => Self::KnobGetReturn {
                id: f.u32("id")?,
                val: f.value("val", kind)?,
                proc_id: f.u32("pid")?,
                req: f.req()?,
                ts: f.ts()?,
            },
            FastTag::KnobDiscMin | FastTag::KnobDiscMax | FastTag::KnobContMin | FastTag::KnobContMax => {
                Self::KnobBound {
                    bound: bound_of(tag),
                    id: f.u32("id")?,
                    val: f.value("val", kind)?,
                    proc_id: f.u32("pid")?,
                    ts: f.ts()?,
                }
            }
            FastTag::KnobDiscGet | FastTag::KnobContGet => Self::KnobGet {
                kind,
                id: f.u32("id")?,
                proc_id: f.u32("pid")?,
                req: f.req()?,
                ts: f.ts()?,
            },
            FastTag::MonDiscMin | FastTag::MonDiscMax | FastTag::MonContMin | FastTag::MonContMax => {
                Self::MonitorBound {
                    bound: bound_of(tag),
                    id: f.u32("id")?,
                    val: f.value("val", kind)?,
                    proc_id: f.u32("pid")?,
                    ts: f.ts()?,
                }
            }
            FastTag::MonDiscWeight | FastTag::MonContWeight => Self::MonitorWeight {
                kind,
                id: f.u32("id")?,
                weight: f.f32("weight")?,
                proc_id: f.u32("pid")?,
                ts: f.ts()?,
            },
            FastTag::MonDiscSet | FastTag::MonContSet => Self::MonitorSet {
                id: f.u32("id")?,
                val: f.value("val", kind)?,
                proc_id: f.u32("pid")?,
                ts: f.ts()?,
            },
            FastTag::DevKnobDiscSet | FastTag::DevKnobContSet => Self::DeviceKnobSet {
                id: PackedId::unpack(f.u32("id")?),
                val: f.value("val", kind)?,
                ts: f.ts()?,
            },
            FastTag::DevMonDiscGet | FastTag::DevMonContGet => Self::DeviceMonitorGet {
                kind,
                id: PackedId::unpack(f.u32("id")?),
                req: f.req()?,
                ts: f.ts()?,
            },
            FastTag::DevMonDiscGetReturn | FastTag::DevMonContGetReturn => Self::DeviceMonitorReturn {
                id: PackedId::unpack(f.u32("id")?),
                reading: MonitorReading {
                    val: f.value("val", kind)?,
                    min: f.value("min", kind)?,
                    max: f.value("max", kind)?,
                },
                req: f.req()?,
                ts: f.ts()?,
            },
        };
        Ok(frame)
    }
}

fn bound_of(tag: FastTag) -> Bound {
    match tag {
        FastTag::KnobDiscMax | FastTag::KnobContMax | FastTag::MonDiscMax | FastTag::MonContMax => {
            Bound::Max
        }
        _ => Bound::Min,
    }
}

/// Number of fields after the tag for each frame kind.
fn field_count(tag: FastTag) -> usize {
    match tag {
        FastTag::KnobDiscGetReturn | FastTag::KnobContGetReturn => 5,
        FastTag::DevKnobDiscSet | FastTag::DevKnobContSet => 3,
        FastTag::DevMonDiscGet | FastTag::DevMonContGet => 3,
        FastTag::DevMonDiscGetReturn | FastTag::DevMonContGetReturn => 6,
        _ => 4,
    }
}

/// Sequential reader over the fields of one frame.
struct Fields<'a> {
    fields: std::slice::Iter<'a, &'a str>,
}

impl<'a> Fields<'a> {
    fn new(tag: FastTag, fields: &'a [&'a str]) -> ProtocolResult<Self> {
        let expected = field_count(tag);
        if fields.len() != expected {
            return Err(ProtocolError::FieldCount {
                tag: char::from(tag.as_byte()),
                expected,
                found: fields.len(),
            });
        }
        Ok(Self {
            fields: fields.iter(),
        })
    }

    fn next(&mut self, name: &'static str) -> ProtocolResult<&'a str> {
        self.fields
            .next()
            .map(|s| s.trim())
            .ok_or_else(|| ProtocolError::field(name, ""))
    }

    fn u32(&mut self, name: &'static str) -> ProtocolResult<u32> {
        let raw = self.next(name)?;
        raw.parse().map_err(|_| ProtocolError::field(name, raw))
    }

    fn f32(&mut self, name: &'static str) -> ProtocolResult<f32> {
        let raw = self.next(name)?;
        parse_f32(raw).ok_or_else(|| ProtocolError::field(name, raw))
    }

    fn value(&mut self, name: &'static str, kind: ScalarKind) -> ProtocolResult<Value> {
        let raw = self.next(name)?;
        parse_value(raw, kind).ok_or_else(|| ProtocolError::field(name, raw))
    }

    fn req(&mut self) -> ProtocolResult<RequestId> {
        let raw = self.next("req")?;
        raw.parse::<u64>()
            .map(RequestId::new)
            .map_err(|_| ProtocolError::field("req", raw))
    }

    fn ts(&mut self) -> ProtocolResult<Timestamp> {
        let raw = self.next("ts")?;
        raw.parse().map_err(|_| ProtocolError::field("ts", raw))
    }
}

/// Parses a continuous value, accepting `inf`, `-inf` and `nan` spellings.
pub fn parse_f32(raw: &str) -> Option<f32> {
    match raw.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Some(f32::INFINITY),
        "-inf" | "-infinity" => Some(f32::NEG_INFINITY),
        "nan" | "-nan" => Some(f32::NAN),
        other => other.parse().ok(),
    }
}

/// Parses a value in the given domain from its text form.
pub fn parse_value(raw: &str, kind: ScalarKind) -> Option<Value> {
    match kind {
        ScalarKind::Continuous => parse_f32(raw).map(Value::Cont),
        ScalarKind::Discrete => match raw {
            "inf" | "+inf" => Some(Value::Disc(i32::MAX)),
            "-inf" => Some(Value::Disc(i32::MIN)),
            other => other.parse().ok().map(Value::Disc),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_set_layout() {
        let frame = FastFrame::MonitorSet {
            id: 3,
            val: Value::Cont(42.0),
            proc_id: 1234,
            ts: 99,
        };
        let bytes = frame.encode();
        assert_eq!(bytes, "f¿3¿42¿1234¿99".as_bytes());
        assert_eq!(FastFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_delimiter_bytes() {
        assert_eq!(DELIMITER.as_bytes(), &[0xC2, 0xBF]);
    }

    #[test]
    fn test_get_frames_carry_request_id() {
        let frame = FastFrame::KnobGet {
            kind: ScalarKind::Discrete,
            id: 7,
            proc_id: 10,
            req: RequestId::new(5),
            ts: 1,
        };
        assert_eq!(frame.encode(), "6¿7¿10¿5¿1".as_bytes());
        assert_eq!(frame.request_id(), Some(RequestId::new(5)));

        let ret = FastFrame::decode("0¿7¿-3¿10¿5¿2".as_bytes()).unwrap();
        assert_eq!(
            ret,
            FastFrame::KnobGetReturn {
                id: 7,
                val: Value::Disc(-3),
                proc_id: 10,
                req: RequestId::new(5),
                ts: 2,
            }
        );
    }

    #[test]
    fn test_device_monitor_return_unbounded() {
        let frame = FastFrame::DeviceMonitorReturn {
            id: PackedId::new(1, 2, 0, 3),
            reading: MonitorReading {
                val: Value::Cont(1.25),
                min: Value::Cont(f32::NEG_INFINITY),
                max: Value::Cont(f32::INFINITY),
            },
            req: RequestId::new(9),
            ts: 100,
        };
        let bytes = frame.encode();
        assert_eq!(bytes, "l¿16908291¿1.25¿-inf¿inf¿9¿100".as_bytes());
        assert_eq!(FastFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_discrete_extremes_survive_both_spellings() {
        let frame = FastFrame::KnobBound {
            bound: Bound::Max,
            id: 1,
            val: Value::Disc(i32::MAX),
            proc_id: 2,
            ts: 3,
        };
        assert_eq!(FastFrame::decode(&frame.encode()).unwrap(), frame);
        assert_eq!(FastFrame::decode("3¿1¿inf¿2¿3".as_bytes()).unwrap(), frame);
    }

    #[test]
    fn test_bound_tags() {
        let min = FastFrame::MonitorBound {
            bound: Bound::Min,
            id: 1,
            val: Value::Disc(0),
            proc_id: 1,
            ts: 1,
        };
        assert_eq!(min.tag(), FastTag::MonDiscMin);
        let decoded = FastFrame::decode("c¿1¿100¿1¿1".as_bytes()).unwrap();
        assert!(matches!(decoded, FastFrame::MonitorBound { bound: Bound::Max, .. }));
    }

    #[test]
    fn test_weight_is_continuous_for_both_domains() {
        let frame = FastFrame::MonitorWeight {
            kind: ScalarKind::Discrete,
            id: 4,
            weight: 0.5,
            proc_id: 8,
            ts: 1,
        };
        assert_eq!(frame.encode(), "a¿4¿0.5¿8¿1".as_bytes());
        assert_eq!(FastFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            FastFrame::decode(b"z"),
            Err(ProtocolError::UnknownTag(_))
        ));
        assert!(matches!(
            FastFrame::decode("f¿1¿2".as_bytes()),
            Err(ProtocolError::FieldCount { tag: 'f', expected: 4, found: 2 })
        ));
        assert!(matches!(
            FastFrame::decode("e¿1¿1.5¿2¿3".as_bytes()),
            Err(ProtocolError::InvalidField { field: "val", .. })
        ));
        assert!(matches!(
            FastFrame::decode(&[0xFF, 0xFE]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_trailing_nul_is_ignored() {
        let frame = FastFrame::decode("i¿256¿4¿7\0\0".as_bytes()).unwrap();
        assert_eq!(
            frame,
            FastFrame::DeviceMonitorGet {
                kind: ScalarKind::Discrete,
                id: PackedId::new(0, 0, 1, 0),
                req: RequestId::new(4),
                ts: 7,
            }
        );
    }
}

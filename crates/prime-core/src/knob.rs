//! Knob and monitor containers for Apps and Devices.
//!
//! Every container is generic over its value domain. `V = i32` and `V = f32`
//! are the typed forms handed to callers; `V = Value` is the erased form kept
//! in mixed tables and carried by the codec. [`AppKnob::erased`] and
//! [`AppKnob::typed`] (and their siblings) convert between the two.
//!
//! The containers never clamp. `min <= val <= max` is the caller's
//! responsibility and can be checked with `is_within_bounds`.

use serde::Serialize;

use crate::packed_id::PackedId;
use crate::types::{AppKnobType, AppMonitorType, DeviceKnobType, DeviceMonitorType};
use crate::value::{Scalar, ScalarKind, Value};

fn within<V: PartialOrd>(min: &V, val: &V, max: &V) -> bool {
    min <= val && val <= max
}

fn typed_triple<T: Scalar>(min: Value, max: Value, val: Value) -> Option<(T, T, T)> {
    Some((T::from_value(min)?, T::from_value(max)?, T::from_value(val)?))
}

// ============================================================================
// Application Knob
// ============================================================================

/// A tunable parameter registered by an App.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppKnob<V = Value> {
    /// Owning process
    pub proc_id: u32,
    /// Id assigned by the runtime manager; unique across all knobs and monitors
    pub id: u32,
    #[serde(rename = "type")]
    pub knob_type: AppKnobType,
    pub min: V,
    pub max: V,
    pub val: V,
}

impl<V: PartialOrd> AppKnob<V> {
    /// True when `min <= val <= max`.
    pub fn is_within_bounds(&self) -> bool {
        within(&self.min, &self.val, &self.max)
    }
}

impl<V: Scalar> AppKnob<V> {
    /// Erases the value domain.
    pub fn erased(&self) -> AppKnob<Value> {
        AppKnob {
            proc_id: self.proc_id,
            id: self.id,
            knob_type: self.knob_type,
            min: self.min.into_value(),
            max: self.max.into_value(),
            val: self.val.into_value(),
        }
    }
}

impl AppKnob<Value> {
    /// Domain of the knob, taken from its current value.
    pub fn kind(&self) -> ScalarKind {
        self.val.kind()
    }

    /// Recovers the typed form; `None` if the domain differs.
    pub fn typed<T: Scalar>(&self) -> Option<AppKnob<T>> {
        let (min, max, val) = typed_triple::<T>(self.min, self.max, self.val)?;
        Some(AppKnob {
            proc_id: self.proc_id,
            id: self.id,
            knob_type: self.knob_type,
            min,
            max,
            val,
        })
    }
}

// ============================================================================
// Application Monitor
// ============================================================================

/// An observable value pushed by an App.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppMonitor<V = Value> {
    pub proc_id: u32,
    pub id: u32,
    #[serde(rename = "type")]
    pub mon_type: AppMonitorType,
    pub min: V,
    pub max: V,
    pub val: V,
    /// Relative importance among the App's monitors
    pub weight: f32,
}

impl<V: PartialOrd> AppMonitor<V> {
    pub fn is_within_bounds(&self) -> bool {
        within(&self.min, &self.val, &self.max)
    }
}

impl<V: Scalar> AppMonitor<V> {
    pub fn erased(&self) -> AppMonitor<Value> {
        AppMonitor {
            proc_id: self.proc_id,
            id: self.id,
            mon_type: self.mon_type,
            min: self.min.into_value(),
            max: self.max.into_value(),
            val: self.val.into_value(),
            weight: self.weight,
        }
    }
}

impl AppMonitor<Value> {
    pub fn kind(&self) -> ScalarKind {
        self.val.kind()
    }

    pub fn typed<T: Scalar>(&self) -> Option<AppMonitor<T>> {
        let (min, max, val) = typed_triple::<T>(self.min, self.max, self.val)?;
        Some(AppMonitor {
            proc_id: self.proc_id,
            id: self.id,
            mon_type: self.mon_type,
            min,
            max,
            val,
            weight: self.weight,
        })
    }
}

// ============================================================================
// Device Knob
// ============================================================================

/// A hardware control published by a Device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceKnob<V = Value> {
    pub id: PackedId,
    #[serde(rename = "type")]
    pub knob_type: DeviceKnobType,
    pub min: V,
    pub max: V,
    pub val: V,
    /// Value the hardware is reset to
    pub init: V,
}

impl<V: PartialOrd> DeviceKnob<V> {
    pub fn is_within_bounds(&self) -> bool {
        within(&self.min, &self.val, &self.max)
    }
}

impl<V: Scalar> DeviceKnob<V> {
    pub fn erased(&self) -> DeviceKnob<Value> {
        DeviceKnob {
            id: self.id,
            knob_type: self.knob_type,
            min: self.min.into_value(),
            max: self.max.into_value(),
            val: self.val.into_value(),
            init: self.init.into_value(),
        }
    }
}

impl DeviceKnob<Value> {
    pub fn kind(&self) -> ScalarKind {
        self.val.kind()
    }

    pub fn typed<T: Scalar>(&self) -> Option<DeviceKnob<T>> {
        let (min, max, val) = typed_triple::<T>(self.min, self.max, self.val)?;
        Some(DeviceKnob {
            id: self.id,
            knob_type: self.knob_type,
            min,
            max,
            val,
            init: T::from_value(self.init)?,
        })
    }
}

// ============================================================================
// Device Monitor
// ============================================================================

/// A hardware telemetry source published by a Device.
///
/// Bounds are refreshed together with the value on every read because some
/// sensors report calibrated limits that drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceMonitor<V = Value> {
    pub id: PackedId,
    #[serde(rename = "type")]
    pub mon_type: DeviceMonitorType,
    pub min: V,
    pub max: V,
    pub val: V,
}

impl<V: PartialOrd> DeviceMonitor<V> {
    pub fn is_within_bounds(&self) -> bool {
        within(&self.min, &self.val, &self.max)
    }
}

impl<V: Copy> DeviceMonitor<V> {
    /// Overwrites value and bounds with a fresh reading.
    pub fn apply_reading(&mut self, reading: MonitorReading<V>) {
        self.val = reading.val;
        self.min = reading.min;
        self.max = reading.max;
    }
}

impl<V: Scalar> DeviceMonitor<V> {
    pub fn erased(&self) -> DeviceMonitor<Value> {
        DeviceMonitor {
            id: self.id,
            mon_type: self.mon_type,
            min: self.min.into_value(),
            max: self.max.into_value(),
            val: self.val.into_value(),
        }
    }
}

impl DeviceMonitor<Value> {
    pub fn kind(&self) -> ScalarKind {
        self.val.kind()
    }

    pub fn typed<T: Scalar>(&self) -> Option<DeviceMonitor<T>> {
        let (min, max, val) = typed_triple::<T>(self.min, self.max, self.val)?;
        Some(DeviceMonitor {
            id: self.id,
            mon_type: self.mon_type,
            min,
            max,
            val,
        })
    }
}

/// One hardware read: the value plus the bounds valid at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorReading<V = Value> {
    pub val: V,
    pub min: V,
    pub max: V,
}

impl<V: Scalar> MonitorReading<V> {
    pub fn erased(&self) -> MonitorReading<Value> {
        MonitorReading {
            val: self.val.into_value(),
            min: self.min.into_value(),
            max: self.max.into_value(),
        }
    }
}

impl MonitorReading<Value> {
    pub fn typed<T: Scalar>(&self) -> Option<MonitorReading<T>> {
        let (min, max, val) = typed_triple::<T>(self.min, self.max, self.val)?;
        Some(MonitorReading { val, min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disc_knob() -> AppKnob<i32> {
        AppKnob {
            proc_id: 100,
            id: 1,
            knob_type: AppKnobType::Parallelism,
            min: 0,
            max: 10,
            val: 5,
        }
    }

    #[test]
    fn test_bounds_check_does_not_clamp() {
        let mut knob = disc_knob();
        assert!(knob.is_within_bounds());
        knob.val = 11;
        assert!(!knob.is_within_bounds());
        assert_eq!(knob.val, 11);
    }

    #[test]
    fn test_erase_then_type_preserves_fields() {
        let knob = disc_knob();
        let erased = knob.erased();
        assert_eq!(erased.kind(), ScalarKind::Discrete);
        assert_eq!(erased.typed::<i32>(), Some(knob));
        assert_eq!(erased.typed::<f32>(), None);
    }

    #[test]
    fn test_unbounded_continuous_monitor_is_within_bounds() {
        let mon = AppMonitor::<f32> {
            proc_id: 1,
            id: 2,
            mon_type: AppMonitorType::Performance,
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
            val: 42.0,
            weight: 1.0,
        };
        assert!(mon.is_within_bounds());
        assert_eq!(mon.erased().typed::<f32>(), Some(mon));
    }

    #[test]
    fn test_device_monitor_apply_reading_refreshes_bounds() {
        let mut mon = DeviceMonitor::<f32> {
            id: PackedId::new(0, 1, 0, 0),
            mon_type: DeviceMonitorType::Temperature,
            min: 0.0,
            max: 100.0,
            val: 20.0,
        };
        mon.apply_reading(MonitorReading {
            val: 55.5,
            min: 10.0,
            max: 95.0,
        });
        assert_eq!(mon.val, 55.5);
        assert_eq!(mon.min, 10.0);
        assert_eq!(mon.max, 95.0);
    }

    #[test]
    fn test_serialize_uses_wire_field_names() {
        let json = serde_json::to_value(disc_knob().erased()).unwrap();
        assert_eq!(json["type"], 0);
        assert_eq!(json["proc_id"], 100);
        assert_eq!(json["val"], 5);
    }
}

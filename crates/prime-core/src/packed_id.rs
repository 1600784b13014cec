//! Hierarchical device addresses.
//!
//! A device knob or monitor is addressed by four 8-bit fields packed into one
//! `u32`:
//!
//! ```text
//!  31        24 23        16 15         8 7          0
//! ┌────────────┬────────────┬────────────┬────────────┐
//! │ functional │  sub-unit  │  reserved  │   local    │
//! │    unit    │            │            │            │
//! └────────────┴────────────┴────────────┴────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Packed hierarchical id of a device knob or monitor.
///
/// Serializes as the packed `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct PackedId {
    /// Functional unit (e.g. a CPU cluster or GPU)
    pub functional_unit: u8,
    /// Sub-unit within the functional unit, or the knob/monitor group id
    pub sub_unit: u8,
    /// Reserved level, zero in every published architecture
    pub reserved: u8,
    /// Id of the entry within its group
    pub local: u8,
}

impl PackedId {
    /// Creates an id from its four fields.
    pub const fn new(functional_unit: u8, sub_unit: u8, reserved: u8, local: u8) -> Self {
        Self {
            functional_unit,
            sub_unit,
            reserved,
            local,
        }
    }

    /// Packs the fields into their wire form.
    pub const fn pack(self) -> u32 {
        ((self.functional_unit as u32) << 24)
            | ((self.sub_unit as u32) << 16)
            | ((self.reserved as u32) << 8)
            | (self.local as u32)
    }

    /// Splits a wire id into its fields. Exact inverse of [`PackedId::pack`].
    pub const fn unpack(raw: u32) -> Self {
        Self {
            functional_unit: ((raw >> 24) & 0xFF) as u8,
            sub_unit: ((raw >> 16) & 0xFF) as u8,
            reserved: ((raw >> 8) & 0xFF) as u8,
            local: (raw & 0xFF) as u8,
        }
    }
}

impl From<u32> for PackedId {
    fn from(raw: u32) -> Self {
        Self::unpack(raw)
    }
}

impl From<PackedId> for u32 {
    fn from(id: PackedId) -> u32 {
        id.pack()
    }
}

impl fmt::Display for PackedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.functional_unit, self.sub_unit, self.reserved, self.local
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        let id = PackedId::new(1, 2, 0, 3);
        assert_eq!(id.pack(), (1 << 24) + (2 << 16) + 3);
    }

    #[test]
    fn test_unpack_inverts_pack() {
        for raw in [0u32, 1, 0x0102_0304, 0xFFFF_FFFF, 0x8000_00FF] {
            assert_eq!(PackedId::unpack(raw).pack(), raw);
        }
        let id = PackedId::unpack(0x0A0B_0C0D);
        assert_eq!(id, PackedId::new(0x0A, 0x0B, 0x0C, 0x0D));
    }

    #[test]
    fn test_serde_transparent_u32() {
        let id = PackedId::new(0, 1, 0, 2);
        assert_eq!(serde_json::to_string(&id).unwrap(), "65538");
        let back: PackedId = serde_json::from_str("65538").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_display() {
        assert_eq!(PackedId::new(4, 3, 0, 1).to_string(), "4.3.0.1");
    }
}

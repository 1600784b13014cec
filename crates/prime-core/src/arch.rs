//! Device architecture document.
//!
//! A Device publishes one JSON document describing its functional-unit tree.
//! The runtime manager reads it once at startup and uses it to turn
//! human-readable paths into [`PackedId`]s and to group the Device's knobs
//! and monitors by functional unit or sub-unit.
//!
//! # Document Shape
//!
//! ```text
//! {
//!   "device": {
//!     "descriptor": "odroid-xu3",
//!     "functional_units": {
//!       "a15": {
//!         "id": 1,
//!         "knobs": { "id": 0, "freq": { "id": 0, "type": 1 } },
//!         "mons":  { "id": 1, "power": { "id": 0, "type": 0 } },
//!         "core0": {
//!           "id": 2,
//!           "knobs": { "id": 0, "en": { "id": 0, "type": 2 } },
//!           "mons":  { "id": 1, "cycles": { "id": 1, "type": 2 } }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Any key of a functional unit other than `id`, `knobs` and `mons` is a
//! sub-unit; a nested `sub_units` object is accepted as well. Ids may be JSON
//! numbers or numeric strings.
//!
//! Functional-unit level entries pack as `(fu, group id, 0, entry id)`;
//! sub-unit entries pack as `(fu, sub-unit id, 0, entry id)`.

use std::fmt;
use std::path::Path;

use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::knob::{DeviceKnob, DeviceMonitor};
use crate::packed_id::PackedId;
use crate::types::{DeviceKnobType, DeviceMonitorType};

const KEY_ID: &str = "id";
const KEY_KNOBS: &str = "knobs";
const KEY_MONS: &str = "mons";
const KEY_SUB_UNITS: &str = "sub_units";

// ============================================================================
// Document Model
// ============================================================================

/// One named knob or monitor inside a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchEntry {
    pub name: String,
    /// Id within its group
    pub id: u8,
    /// Type tag exactly as written in the document
    pub entry_type: String,
    /// Fully packed address
    pub packed: PackedId,
}

/// The `knobs` or `mons` block of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryGroup {
    pub id: u8,
    pub entries: Vec<ArchEntry>,
}

impl EntryGroup {
    fn find(&self, name: &str) -> Option<&ArchEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Second level of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubUnit {
    pub name: String,
    pub id: u8,
    pub knobs: Option<EntryGroup>,
    pub mons: Option<EntryGroup>,
}

/// Top level of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionalUnit {
    pub name: String,
    pub id: u8,
    pub knobs: Option<EntryGroup>,
    pub mons: Option<EntryGroup>,
    pub sub_units: Vec<SubUnit>,
}

/// A parsed architecture document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceArchitecture {
    pub descriptor: String,
    pub functional_units: Vec<FunctionalUnit>,
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_id(value: Option<&Json>, path: &str) -> DomainResult<u8> {
    let value = value.ok_or_else(|| DomainError::MissingNode {
        path: path.to_string(),
    })?;
    let raw = match value {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    raw.and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| DomainError::InvalidFieldValue {
            field: path.to_string(),
            value: value.to_string(),
            expected: "an id between 0 and 255".to_string(),
        })
}

fn as_object<'a>(value: &'a Json, path: &str) -> DomainResult<&'a Map<String, Json>> {
    value
        .as_object()
        .ok_or_else(|| DomainError::parse(path, "expected an object"))
}

fn type_text(value: Option<&Json>) -> String {
    match value {
        Some(Json::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn parse_group(
    value: Option<&Json>,
    path: &str,
    fu_id: u8,
    level_id: Option<u8>,
) -> DomainResult<Option<EntryGroup>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let obj = as_object(value, path)?;
    let id = parse_id(obj.get(KEY_ID), &format!("{path}.{KEY_ID}"))?;
    let sub = level_id.unwrap_or(id);

    let mut entries = Vec::new();
    for (name, entry) in obj.iter().filter(|(k, _)| k.as_str() != KEY_ID) {
        let entry_path = format!("{path}.{name}");
        let entry_obj = as_object(entry, &entry_path)?;
        let local = parse_id(entry_obj.get(KEY_ID), &format!("{entry_path}.{KEY_ID}"))?;
        entries.push(ArchEntry {
            name: name.clone(),
            id: local,
            entry_type: type_text(entry_obj.get("type")),
            packed: PackedId::new(fu_id, sub, 0, local),
        });
    }
    Ok(Some(EntryGroup { id, entries }))
}

fn parse_sub_unit(name: &str, value: &Json, path: &str, fu_id: u8) -> DomainResult<SubUnit> {
    let obj = as_object(value, path)?;
    let id = parse_id(obj.get(KEY_ID), &format!("{path}.{KEY_ID}"))?;
    Ok(SubUnit {
        name: name.to_string(),
        id,
        knobs: parse_group(obj.get(KEY_KNOBS), &format!("{path}.{KEY_KNOBS}"), fu_id, Some(id))?,
        mons: parse_group(obj.get(KEY_MONS), &format!("{path}.{KEY_MONS}"), fu_id, Some(id))?,
    })
}

fn parse_functional_unit(name: &str, value: &Json, path: &str) -> DomainResult<FunctionalUnit> {
    let obj = as_object(value, path)?;
    let id = parse_id(obj.get(KEY_ID), &format!("{path}.{KEY_ID}"))?;

    let mut sub_units = Vec::new();
    for (key, child) in obj {
        match key.as_str() {
            KEY_ID | KEY_KNOBS | KEY_MONS => {}
            KEY_SUB_UNITS => {
                let nested = as_object(child, &format!("{path}.{KEY_SUB_UNITS}"))?;
                for (sub_name, sub) in nested {
                    let sub_path = format!("{path}.{KEY_SUB_UNITS}.{sub_name}");
                    sub_units.push(parse_sub_unit(sub_name, sub, &sub_path, id)?);
                }
            }
            _ => sub_units.push(parse_sub_unit(key, child, &format!("{path}.{key}"), id)?),
        }
    }

    Ok(FunctionalUnit {
        name: name.to_string(),
        id,
        knobs: parse_group(obj.get(KEY_KNOBS), &format!("{path}.{KEY_KNOBS}"), id, None)?,
        mons: parse_group(obj.get(KEY_MONS), &format!("{path}.{KEY_MONS}"), id, None)?,
        sub_units,
    })
}

impl DeviceArchitecture {
    /// Parses an already-decoded JSON document.
    ///
    /// A document without `functional_units` is valid and describes a
    /// device with no addressable units.
    pub fn from_json(doc: &Json) -> DomainResult<Self> {
        let device = doc.get("device").ok_or_else(|| DomainError::MissingNode {
            path: "device".to_string(),
        })?;
        let descriptor = device
            .get("descriptor")
            .and_then(Json::as_str)
            .ok_or_else(|| DomainError::MissingNode {
                path: "device.descriptor".to_string(),
            })?
            .to_string();

        let mut functional_units = Vec::new();
        if let Some(units) = device.get("functional_units") {
            let units = as_object(units, "device.functional_units")?;
            for (name, unit) in units {
                let path = format!("device.functional_units.{name}");
                functional_units.push(parse_functional_unit(name, unit, &path)?);
            }
        } else {
            debug!(descriptor = %descriptor, "Architecture has no functional units");
        }

        Ok(Self {
            descriptor,
            functional_units,
        })
    }

    /// Parses a JSON document from text.
    pub fn parse(text: &str) -> DomainResult<Self> {
        let doc: Json = serde_json::from_str(text).map_err(|e| DomainError::parse("architecture", e))?;
        Self::from_json(&doc)
    }

    /// Reads and parses the document at `path`.
    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DomainError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn unit(&self, fu_id: u8) -> Option<&FunctionalUnit> {
        self.functional_units.iter().find(|fu| fu.id == fu_id)
    }

    fn sub_unit(&self, fu_id: u8, sub_id: u8) -> Option<&SubUnit> {
        self.unit(fu_id)?.sub_units.iter().find(|su| su.id == sub_id)
    }

    /// Resolves `fu.knobs.name`, `fu.mons.name`, `fu.sub.knobs.name` or
    /// `fu.sub.mons.name` to a packed id.
    pub fn resolve(&self, path: &str) -> DomainResult<PackedId> {
        let unknown = || DomainError::UnknownPath {
            path: path.to_string(),
        };
        let parts: Vec<&str> = path.split('.').collect();
        let (fu_name, sub_name, group, entry) = match parts.as_slice() {
            [fu, group, entry] => (*fu, None, *group, *entry),
            [fu, sub, group, entry] => (*fu, Some(*sub), *group, *entry),
            _ => return Err(unknown()),
        };

        let fu = self
            .functional_units
            .iter()
            .find(|fu| fu.name == fu_name)
            .ok_or_else(unknown)?;
        let (knobs, mons) = match sub_name {
            None => (fu.knobs.as_ref(), fu.mons.as_ref()),
            Some(name) => {
                let su = fu.sub_units.iter().find(|su| su.name == name).ok_or_else(unknown)?;
                (su.knobs.as_ref(), su.mons.as_ref())
            }
        };
        let group = match group {
            KEY_KNOBS => knobs,
            KEY_MONS => mons,
            _ => None,
        };
        group
            .and_then(|g| g.find(entry))
            .map(|e| e.packed)
            .ok_or_else(unknown)
    }

    /// Ids of every functional unit.
    pub fn functional_unit_ids(&self) -> Vec<u8> {
        self.functional_units.iter().map(|fu| fu.id).collect()
    }

    /// Packed ids of the monitors and knobs at the top level of a functional
    /// unit. Sub-unit entries are not included.
    pub fn ids_in_functional_unit(&self, fu_id: u8) -> Vec<PackedId> {
        self.unit(fu_id)
            .map(|fu| group_ids(&[fu.mons.as_ref(), fu.knobs.as_ref()]))
            .unwrap_or_default()
    }

    /// Ids of the sub-units of a functional unit.
    pub fn sub_unit_ids(&self, fu_id: u8) -> Vec<u8> {
        self.unit(fu_id)
            .map(|fu| fu.sub_units.iter().map(|su| su.id).collect())
            .unwrap_or_default()
    }

    /// Packed ids of the monitors and knobs of one sub-unit.
    pub fn ids_in_sub_unit(&self, fu_id: u8, sub_id: u8) -> Vec<PackedId> {
        self.sub_unit(fu_id, sub_id)
            .map(|su| group_ids(&[su.mons.as_ref(), su.knobs.as_ref()]))
            .unwrap_or_default()
    }

    /// Entries of `entries` addressed at the top level of a functional unit.
    pub fn entries_in_functional_unit<E: DeviceEntry + Clone>(&self, entries: &[E], fu_id: u8) -> Vec<E> {
        select_ids(entries, &self.ids_in_functional_unit(fu_id))
    }

    /// Entries of `entries` addressed inside one sub-unit.
    pub fn entries_in_sub_unit<E: DeviceEntry + Clone>(
        &self,
        entries: &[E],
        fu_id: u8,
        sub_id: u8,
    ) -> Vec<E> {
        select_ids(entries, &self.ids_in_sub_unit(fu_id, sub_id))
    }
}

fn group_ids(groups: &[Option<&EntryGroup>]) -> Vec<PackedId> {
    groups
        .iter()
        .flatten()
        .flat_map(|g| g.entries.iter().map(|e| e.packed))
        .collect()
}

fn select_ids<E: DeviceEntry + Clone>(entries: &[E], ids: &[PackedId]) -> Vec<E> {
    ids.iter()
        .flat_map(|id| entries.iter().filter(move |e| e.packed_id() == *id))
        .cloned()
        .collect()
}

// ============================================================================
// Entry Selection
// ============================================================================

/// Common view over device knobs and monitors for architecture queries.
pub trait DeviceEntry {
    /// Semantic type enum of the entry
    type Kind: Copy + PartialEq;

    fn packed_id(&self) -> PackedId;

    fn entry_type(&self) -> Self::Kind;
}

impl<V> DeviceEntry for DeviceKnob<V> {
    type Kind = DeviceKnobType;

    fn packed_id(&self) -> PackedId {
        self.id
    }

    fn entry_type(&self) -> DeviceKnobType {
        self.knob_type
    }
}

impl<V> DeviceEntry for DeviceMonitor<V> {
    type Kind = DeviceMonitorType;

    fn packed_id(&self) -> PackedId {
        self.id
    }

    fn entry_type(&self) -> DeviceMonitorType {
        self.mon_type
    }
}

/// All entries of a given semantic type.
pub fn of_type<E: DeviceEntry + Clone>(entries: &[E], kind: E::Kind) -> Vec<E> {
    entries
        .iter()
        .filter(|e| e.entry_type() == kind)
        .cloned()
        .collect()
}

// ============================================================================
// Display
// ============================================================================

fn write_group(f: &mut fmt::Formatter<'_>, group: Option<&EntryGroup>, indent: &str) -> fmt::Result {
    if let Some(group) = group {
        for entry in &group.entries {
            writeln!(f, "{indent}{}: id: {}, type: {}", entry.name, entry.id, entry.entry_type)?;
        }
    }
    Ok(())
}

impl fmt::Display for DeviceArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device Name: {}", self.descriptor)?;
        if self.functional_units.is_empty() {
            return writeln!(f, "\tNo Functional Units");
        }
        writeln!(f, "Functional Units:")?;
        for fu in &self.functional_units {
            writeln!(f, "\t{}:", fu.name)?;
            write_group(f, fu.mons.as_ref(), "\t\t")?;
            write_group(f, fu.knobs.as_ref(), "\t\t")?;
            for su in &fu.sub_units {
                writeln!(f, "\t\t{}", su.name)?;
                write_group(f, su.mons.as_ref(), "\t\t\t")?;
                write_group(f, su.knobs.as_ref(), "\t\t\t")?;
            }
        }
        Ok(())
    }
}

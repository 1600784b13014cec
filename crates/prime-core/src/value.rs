//! Scalar domains for knob and monitor values.
//!
//! Knobs and monitors are either discrete (`i32`) or continuous (`f32`).
//! The [`Scalar`] trait ties each Rust type to its [`ScalarKind`] and to the
//! type-erased [`Value`] used wherever both domains share one table or one
//! wire field.
//!
//! Unbounded bounds use the domain extremes: `i32::MIN`/`i32::MAX` for
//! discrete values and `-inf`/`+inf` for continuous ones. Serialization maps
//! those extremes to the strings `"-inf"`/`"inf"` so structured documents
//! never carry a number the parser cannot represent.

use std::fmt;

use serde::{Serialize, Serializer};

/// Discrete scalar domain.
pub type Disc = i32;

/// Continuous scalar domain.
pub type Cont = f32;

// ============================================================================
// Scalar Kind
// ============================================================================

/// Which numeric domain a knob or monitor lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Discrete,
    Continuous,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete => write!(f, "discrete"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

// ============================================================================
// Value
// ============================================================================

/// A type-erased scalar.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum Value {
    Disc(Disc),
    Cont(Cont),
}

impl Value {
    /// Returns the domain of this value.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Disc(_) => ScalarKind::Discrete,
            Self::Cont(_) => ScalarKind::Continuous,
        }
    }

    /// Widens the value for arithmetic that does not care about the domain.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Disc(v) => f64::from(*v),
            Self::Cont(v) => f64::from(*v),
        }
    }

    /// True when the value is one of its domain's unbounded extremes.
    pub fn is_unbounded(&self) -> bool {
        match self {
            Self::Disc(v) => *v == i32::MIN || *v == i32::MAX,
            Self::Cont(v) => v.is_infinite(),
        }
    }

    /// Zero in the given domain.
    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Discrete => Self::Disc(0),
            ScalarKind::Continuous => Self::Cont(0.0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disc(v) => write!(f, "{v}"),
            Self::Cont(v) => write!(f, "{v}"),
        }
    }
}

impl From<Disc> for Value {
    fn from(v: Disc) -> Self {
        Self::Disc(v)
    }
}

impl From<Cont> for Value {
    fn from(v: Cont) -> Self {
        Self::Cont(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::Disc(i32::MAX) => serializer.serialize_str("inf"),
            Self::Disc(i32::MIN) => serializer.serialize_str("-inf"),
            Self::Disc(v) => serializer.serialize_i32(v),
            Self::Cont(v) if v.is_nan() => serializer.serialize_str("nan"),
            Self::Cont(v) if v == f32::INFINITY => serializer.serialize_str("inf"),
            Self::Cont(v) if v == f32::NEG_INFINITY => serializer.serialize_str("-inf"),
            Self::Cont(v) => serializer.serialize_f32(v),
        }
    }
}

// ============================================================================
// Scalar Trait
// ============================================================================

/// A concrete numeric domain usable as a knob or monitor value.
pub trait Scalar:
    Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Domain tag for this type.
    const KIND: ScalarKind;

    /// Lower extreme, used for "no lower bound".
    const UNBOUNDED_MIN: Self;

    /// Upper extreme, used for "no upper bound".
    const UNBOUNDED_MAX: Self;

    /// Erases the concrete type.
    fn into_value(self) -> Value;

    /// Recovers the concrete type; `None` when the domains differ.
    fn from_value(value: Value) -> Option<Self>;
}

impl Scalar for Disc {
    const KIND: ScalarKind = ScalarKind::Discrete;
    const UNBOUNDED_MIN: Self = i32::MIN;
    const UNBOUNDED_MAX: Self = i32::MAX;

    fn into_value(self) -> Value {
        Value::Disc(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Disc(v) => Some(v),
            Value::Cont(_) => None,
        }
    }
}

impl Scalar for Cont {
    const KIND: ScalarKind = ScalarKind::Continuous;
    const UNBOUNDED_MIN: Self = f32::NEG_INFINITY;
    const UNBOUNDED_MAX: Self = f32::INFINITY;

    fn into_value(self) -> Value {
        Value::Cont(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Cont(v) => Some(v),
            Value::Disc(_) => None,
        }
    }
}

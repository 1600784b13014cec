//! Semantic type tags for knobs and monitors.
//!
//! Each enum travels on the wire as its zero-based ordinal, so variant order
//! is part of the protocol and must never be rearranged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Declares a wire-ordinal enum with `as_u32`/`TryFrom<u32>`, `Display` and
/// serde conversions through the ordinal.
macro_rules! ordinal_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $ord:literal => $display:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "u32", into = "u32")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// All variants in ordinal order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Wire ordinal of this variant.
            pub fn as_u32(self) -> u32 {
                match self {
                    $( $name::$variant => $ord ),+
                }
            }
        }

        impl TryFrom<u32> for $name {
            type Error = DomainError;

            fn try_from(value: u32) -> Result<Self, DomainError> {
                match value {
                    $( $ord => Ok($name::$variant), )+
                    _ => Err(DomainError::InvalidOrdinal { kind: $label, value }),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.as_u32()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $( $name::$variant => $display ),+
                };
                write!(f, "{s}")
            }
        }
    };
}

ordinal_enum! {
    /// Application-level knob types.
    AppKnobType, "app knob type" {
        /// Degree of parallelism
        Parallelism = 0 => "PRIME_PAR",
        /// Numeric precision
        Precision = 1 => "PRIME_PREC",
        /// Which compute device to run on
        DeviceSelect = 2 => "PRIME_DEV_SEL",
        /// Iteration count
        Iterations = 3 => "PRIME_ITR",
        /// Core affinity
        Affinity = 4 => "PRIME_AFF",
        Generic = 5 => "PRIME_GEN",
    }
}

ordinal_enum! {
    /// Application-level monitor types.
    AppMonitorType, "app monitor type" {
        Performance = 0 => "PRIME_PERF",
        Accuracy = 1 => "PRIME_ACC",
        Error = 2 => "PRIME_ERR",
        Power = 3 => "PRIME_POW",
    }
}

ordinal_enum! {
    /// Device-level knob types.
    DeviceKnobType, "device knob type" {
        Voltage = 0 => "PRIME_VOLT",
        Frequency = 1 => "PRIME_FREQ",
        /// Unit enable/disable
        Enable = 2 => "PRIME_EN",
        /// Performance counter event selection
        PmcCount = 3 => "PRIME_PMC_CNT",
        Governor = 4 => "PRIME_GOVERNOR",
        FrequencyEnable = 5 => "PRIME_FREQ_EN",
    }
}

ordinal_enum! {
    /// Device-level monitor types.
    DeviceMonitorType, "device monitor type" {
        Power = 0 => "PRIME_POW",
        Temperature = 1 => "PRIME_TEMP",
        Cycles = 2 => "PRIME_CYCLES",
        /// Performance counter reading
        Pmc = 3 => "PRIME_PMC",
    }
}

//! Fast-path tag bytes.
//!
//! One ASCII byte per direction and value domain. The byte values are fixed
//! by the wire format; `{` is never a tag so the slow-path discriminator can
//! never collide with a fast-path frame.

use std::fmt;

use prime_core::ScalarKind;

/// Every fast-path message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FastTag {
    // RTM -> App
    KnobDiscGetReturn,
    KnobContGetReturn,
    // App -> RTM
    KnobDiscMin,
    KnobDiscMax,
    KnobContMin,
    KnobContMax,
    KnobDiscGet,
    KnobContGet,
    MonDiscMin,
    MonDiscMax,
    MonDiscWeight,
    MonContMin,
    MonContMax,
    MonContWeight,
    MonDiscSet,
    MonContSet,
    // RTM -> Device
    DevKnobDiscSet,
    DevKnobContSet,
    DevMonDiscGet,
    DevMonContGet,
    // Device -> RTM
    DevMonDiscGetReturn,
    DevMonContGetReturn,
}

impl FastTag {
    /// All tags in byte order.
    pub const ALL: [FastTag; 22] = [
        Self::KnobDiscGetReturn,
        Self::KnobContGetReturn,
        Self::KnobDiscMin,
        Self::KnobDiscMax,
        Self::KnobContMin,
        Self::KnobContMax,
        Self::KnobDiscGet,
        Self::KnobContGet,
        Self::MonDiscMin,
        Self::MonDiscMax,
        Self::MonDiscWeight,
        Self::MonContMin,
        Self::MonContMax,
        Self::MonContWeight,
        Self::MonDiscSet,
        Self::MonContSet,
        Self::DevKnobDiscSet,
        Self::DevKnobContSet,
        Self::DevMonDiscGet,
        Self::DevMonContGet,
        Self::DevMonDiscGetReturn,
        Self::DevMonContGetReturn,
    ];

    /// Wire byte of this tag.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::KnobDiscGetReturn => b'0',
            Self::KnobContGetReturn => b'1',
            Self::KnobDiscMin => b'2',
            Self::KnobDiscMax => b'3',
            Self::KnobContMin => b'4',
            Self::KnobContMax => b'5',
            Self::KnobDiscGet => b'6',
            Self::KnobContGet => b'7',
            Self::MonDiscMin => b'8',
            Self::MonDiscMax => b'9',
            Self::MonDiscWeight => b'a',
            Self::MonContMin => b'b',
            Self::MonContMax => b'c',
            Self::MonContWeight => b'd',
            Self::MonDiscSet => b'e',
            Self::MonContSet => b'f',
            Self::DevKnobDiscSet => b'g',
            Self::DevKnobContSet => b'h',
            Self::DevMonDiscGet => b'i',
            Self::DevMonContGet => b'j',
            Self::DevMonDiscGetReturn => b'k',
            Self::DevMonContGetReturn => b'l',
        }
    }

    /// Looks up a tag by its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_byte() == byte)
    }

    /// Value domain carried by frames with this tag.
    pub const fn kind(self) -> ScalarKind {
        match self {
            Self::KnobDiscGetReturn
            | Self::KnobDiscMin
            | Self::KnobDiscMax
            | Self::KnobDiscGet
            | Self::MonDiscMin
            | Self::MonDiscMax
            | Self::MonDiscWeight
            | Self::MonDiscSet
            | Self::DevKnobDiscSet
            | Self::DevMonDiscGet
            | Self::DevMonDiscGetReturn => ScalarKind::Discrete,
            _ => ScalarKind::Continuous,
        }
    }
}

impl fmt::Display for FastTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(self.as_byte()))
    }
}

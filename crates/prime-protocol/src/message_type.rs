//! Slow-path dispatch table.
//!
//! Every `type` string a slow-path document may carry is one variant of
//! [`MessageType`]. Decoders resolve the string once and then match
//! exhaustively, so adding a message kind is a compile error until every
//! dispatcher handles it.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

macro_rules! message_types {
    ( $( $variant:ident => $text:literal ),+ $(,)? ) => {
        /// Every slow-path message type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $( $variant ),+
        }

        impl MessageType {
            /// All message types.
            pub const ALL: &'static [MessageType] = &[$( MessageType::$variant ),+];

            /// The wire string of this type.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( MessageType::$variant => $text ),+
                }
            }
        }

        impl FromStr for MessageType {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(MessageType::$variant), )+
                    other => Err(ProtocolError::UnknownType(other.to_string())),
                }
            }
        }
    };
}

message_types! {
    // App <-> RTM
    AppReg => "PRIME_API_APP_REG",
    AppDereg => "PRIME_API_APP_DEREG",
    AppHeartbeat => "PRIME_API_APP_HEARTBEAT",
    AppReturnAppReg => "PRIME_API_APP_RETURN_APP_REG",
    AppReturnAppDereg => "PRIME_API_APP_RETURN_APP_DEREG",
    AppKnobDiscReg => "PRIME_API_APP_KNOB_DISC_REG",
    AppKnobContReg => "PRIME_API_APP_KNOB_CONT_REG",
    AppReturnKnobDiscReg => "PRIME_API_APP_RETURN_KNOB_DISC_REG",
    AppReturnKnobContReg => "PRIME_API_APP_RETURN_KNOB_CONT_REG",
    AppKnobDiscDereg => "PRIME_API_APP_KNOB_DISC_DEREG",
    AppKnobContDereg => "PRIME_API_APP_KNOB_CONT_DEREG",
    AppMonDiscReg => "PRIME_API_APP_MON_DISC_REG",
    AppMonContReg => "PRIME_API_APP_MON_CONT_REG",
    AppReturnMonDiscReg => "PRIME_API_APP_RETURN_MON_DISC_REG",
    AppReturnMonContReg => "PRIME_API_APP_RETURN_MON_CONT_REG",
    AppMonDiscDereg => "PRIME_API_APP_MON_DISC_DEREG",
    AppMonContDereg => "PRIME_API_APP_MON_CONT_DEREG",

    // RTM <-> Device
    DevKnobDiscSize => "PRIME_API_DEV_KNOB_DISC_SIZE",
    DevKnobContSize => "PRIME_API_DEV_KNOB_CONT_SIZE",
    DevReturnKnobDiscSize => "PRIME_API_DEV_RETURN_KNOB_DISC_SIZE",
    DevReturnKnobContSize => "PRIME_API_DEV_RETURN_KNOB_CONT_SIZE",
    DevKnobDiscReg => "PRIME_API_DEV_KNOB_DISC_REG",
    DevKnobContReg => "PRIME_API_DEV_KNOB_CONT_REG",
    DevReturnKnobDiscReg => "PRIME_API_DEV_RETURN_KNOB_DISC_REG",
    DevReturnKnobContReg => "PRIME_API_DEV_RETURN_KNOB_CONT_REG",
    DevKnobDiscDereg => "PRIME_API_DEV_KNOB_DISC_DEREG",
    DevKnobContDereg => "PRIME_API_DEV_KNOB_CONT_DEREG",
    DevMonDiscSize => "PRIME_API_DEV_MON_DISC_SIZE",
    DevMonContSize => "PRIME_API_DEV_MON_CONT_SIZE",
    DevReturnMonDiscSize => "PRIME_API_DEV_RETURN_MON_DISC_SIZE",
    DevReturnMonContSize => "PRIME_API_DEV_RETURN_MON_CONT_SIZE",
    DevMonDiscReg => "PRIME_API_DEV_MON_DISC_REG",
    DevMonContReg => "PRIME_API_DEV_MON_CONT_REG",
    DevReturnMonDiscReg => "PRIME_API_DEV_RETURN_MON_DISC_REG",
    DevReturnMonContReg => "PRIME_API_DEV_RETURN_MON_CONT_REG",
    DevMonDiscDereg => "PRIME_API_DEV_MON_DISC_DEREG",
    DevMonContDereg => "PRIME_API_DEV_MON_CONT_DEREG",
    DevArchGet => "PRIME_API_DEV_ARCH_GET",
    DevReturnArchGet => "PRIME_API_DEV_RETURN_ARCH_GET",

    // UI <-> App
    UiAppReg => "PRIME_UI_APP_REG",
    UiAppDereg => "PRIME_UI_APP_DEREG",
    UiAppMonDiscMin => "PRIME_UI_APP_MON_DISC_MIN",
    UiAppMonDiscMax => "PRIME_UI_APP_MON_DISC_MAX",
    UiAppMonDiscWeight => "PRIME_UI_APP_MON_DISC_WEIGHT",
    UiAppMonContMin => "PRIME_UI_APP_MON_CONT_MIN",
    UiAppMonContMax => "PRIME_UI_APP_MON_CONT_MAX",
    UiAppMonContWeight => "PRIME_UI_APP_MON_CONT_WEIGHT",
    UiAppStop => "PRIME_UI_APP_STOP",
    UiAppReturnAppStart => "PRIME_UI_APP_RETURN_APP_START",
    UiAppReturnAppStop => "PRIME_UI_APP_RETURN_APP_STOP",
    UiAppError => "PRIME_UI_APP_ERROR",

    // UI <-> Device
    UiDevStop => "PRIME_UI_DEV_STOP",
    UiDevReturnDevStart => "PRIME_UI_DEV_RETURN_DEV_START",
    UiDevReturnDevStop => "PRIME_UI_DEV_RETURN_DEV_STOP",
    UiDevError => "PRIME_UI_DEV_ERROR",

    // UI <-> RTM
    UiRtmStop => "PRIME_UI_RTM_STOP",
    UiAppWeight => "PRIME_UI_APP_WEIGHT",
    UiRtmReturnRtmStart => "PRIME_UI_RTM_RETURN_RTM_START",
    UiRtmReturnRtmStop => "PRIME_UI_RTM_RETURN_RTM_STOP",
    UiRtmError => "PRIME_UI_RTM_ERROR",
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_round_trips_through_its_string() {
        for ty in MessageType::ALL {
            assert_eq!(ty.as_str().parse::<MessageType>().unwrap(), *ty);
        }
    }

    #[test]
    fn test_type_strings_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for ty in MessageType::ALL {
            assert!(seen.insert(ty.as_str()));
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = "PRIME_API_APP_FLY".parse::<MessageType>().unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("PRIME_API_APP_FLY".to_string()));
    }
}

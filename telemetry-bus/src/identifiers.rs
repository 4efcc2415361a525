//! Named frame identifiers of the vehicle CAN bus
//!
//! Handlers are registered against these names instead of bare numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier used by the bench transmit test
pub const TEST_FRAME_ID: u32 = 0x123;

/// Frame identifiers published on the vehicle bus (11-bit, standard)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameId {
    H2Alarm,
    FetPack,
    RelPackMtr,
    RelPack,
    RelPackFc,
    FccPack1,
    FccPack2,
    FccPack3,
    H2Pack1,
    H2Pack2,
    H2ArmAlarm,
    BoostPack,
    BoostPack2,
    BattPack,
}

impl FrameId {
    /// Every known identifier, in ascending numeric order
    pub const ALL: [FrameId; 14] = [
        FrameId::H2Alarm,
        FrameId::FetPack,
        FrameId::RelPackMtr,
        FrameId::RelPack,
        FrameId::RelPackFc,
        FrameId::FccPack1,
        FrameId::FccPack2,
        FrameId::FccPack3,
        FrameId::H2Pack1,
        FrameId::H2Pack2,
        FrameId::H2ArmAlarm,
        FrameId::BoostPack,
        FrameId::BoostPack2,
        FrameId::BattPack,
    ];

    /// Numeric identifier on the wire
    pub const fn raw(self) -> u32 {
        match self {
            FrameId::H2Alarm => 0x001,
            FrameId::FetPack => 0x010,
            FrameId::RelPackMtr => 0x015,
            FrameId::RelPack => 0x016,
            FrameId::RelPackFc => 0x017,
            FrameId::FccPack1 => 0x020,
            FrameId::FccPack2 => 0x021,
            FrameId::FccPack3 => 0x022,
            FrameId::H2Pack1 => 0x030,
            FrameId::H2Pack2 => 0x031,
            FrameId::H2ArmAlarm => 0x032,
            FrameId::BoostPack => 0x040,
            FrameId::BoostPack2 => 0x041,
            FrameId::BattPack => 0x050,
        }
    }

    /// Short label used in diagnostics output
    pub const fn label(self) -> &'static str {
        match self {
            FrameId::H2Alarm => "H2_ALARM",
            FrameId::FetPack => "FETPACK",
            FrameId::RelPackMtr => "RELPACKMTR",
            FrameId::RelPack => "RELPACK",
            FrameId::RelPackFc => "RELPACKFC",
            FrameId::FccPack1 => "FCCPACK1",
            FrameId::FccPack2 => "FCCPACK2",
            FrameId::FccPack3 => "FCCPACK3",
            FrameId::H2Pack1 => "H2_PACK1",
            FrameId::H2Pack2 => "H2_PACK2",
            FrameId::H2ArmAlarm => "H2_ARM_ALARM",
            FrameId::BoostPack => "BOOSTPACK",
            FrameId::BoostPack2 => "BOOSTPACK2",
            FrameId::BattPack => "BATTPACK",
        }
    }

    /// Look up the name of a raw identifier
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.raw() == raw)
    }
}

impl From<FrameId> for u32 {
    fn from(id: FrameId) -> Self {
        id.raw()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:03X})", self.label(), self.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identifiers_are_unique_and_standard() {
        let raws: HashSet<u32> = FrameId::ALL.iter().map(|id| id.raw()).collect();
        assert_eq!(raws.len(), FrameId::ALL.len());
        assert!(raws.iter().all(|raw| *raw <= crate::types::MAX_STANDARD_ID));
    }

    #[test]
    fn test_from_raw_round_trip() {
        assert_eq!(FrameId::from_raw(0x032), Some(FrameId::H2ArmAlarm));
        assert_eq!(FrameId::from_raw(0x050), Some(FrameId::BattPack));
        assert_eq!(FrameId::from_raw(TEST_FRAME_ID), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FrameId::H2Alarm.to_string(), "H2_ALARM (0x001)");
        assert_eq!(u32::from(FrameId::FccPack3), 0x022);
    }
}

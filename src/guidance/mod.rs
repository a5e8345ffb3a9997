//! Turn instructions and the angular constants shared by the intersection
//! heuristics.
//!
//! An instruction is a tagged pair of turn kind and direction, plus the
//! access-restriction flag the factory ORs in when a turn crosses into a
//! restricted edge. The closed kind set replaces the upstream handler class
//! hierarchy; classification is plain functions matching on these enums.

pub mod handler;

use crate::error::{Result, RoadloomError};

pub const STRAIGHT_ANGLE: f64 = 180.0;
pub const ORTHOGONAL_ANGLE: f64 = 90.0;
/// Deviation below which a turn still reads as "going straight-ish".
pub const NARROW_TURN_ANGLE: f64 = 40.0;
/// Deviation below which turns compete within the same direction group.
pub const GROUP_ANGLE: f64 = 90.0;
/// Angular noise floor; differences below this never distinguish roads.
pub const FUZZY_ANGLE_DIFFERENCE: f64 = 15.0;
/// Relative deviation factor that makes one road clearly less straight.
pub const DISTINCTION_RATIO: f64 = 2.0;
pub const MAXIMAL_ALLOWED_NO_TURN_DEVIATION: f64 = 10.0;
/// Bearing tolerance for dual-carriageway merge candidates.
pub const MERGABLE_ANGLE_DIFFERENCE: f64 = 10.0;
/// Assumed width of one lane in meters.
pub const ASSUMED_LANE_WIDTH: f64 = 3.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TurnType {
    NoTurn = 0,
    NewNameStraight = 1,
    Continue = 2,
    Turn = 3,
    Merge = 4,
    OnRamp = 5,
    OffRamp = 6,
    Fork = 7,
    EndOfRoad = 8,
    EnterRoundabout = 9,
    StayOnRoundabout = 10,
    LeaveRoundabout = 11,
    UTurn = 12,
}

impl TurnType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoTurn),
            1 => Some(Self::NewNameStraight),
            2 => Some(Self::Continue),
            3 => Some(Self::Turn),
            4 => Some(Self::Merge),
            5 => Some(Self::OnRamp),
            6 => Some(Self::OffRamp),
            7 => Some(Self::Fork),
            8 => Some(Self::EndOfRoad),
            9 => Some(Self::EnterRoundabout),
            10 => Some(Self::StayOnRoundabout),
            11 => Some(Self::LeaveRoundabout),
            12 => Some(Self::UTurn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DirectionModifier {
    UTurn = 0,
    SharpRight = 1,
    Right = 2,
    SlightRight = 3,
    Straight = 4,
    SlightLeft = 5,
    Left = 6,
    SharpLeft = 7,
}

impl DirectionModifier {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::UTurn),
            1 => Some(Self::SharpRight),
            2 => Some(Self::Right),
            3 => Some(Self::SlightRight),
            4 => Some(Self::Straight),
            5 => Some(Self::SlightLeft),
            6 => Some(Self::Left),
            7 => Some(Self::SharpLeft),
            _ => None,
        }
    }
}

/// Map a turn angle (u-turn 0, right 90, straight 180, left 270) to its
/// announced direction.
pub fn direction_from_angle(angle: f64) -> DirectionModifier {
    debug_assert!((0.0..=360.0).contains(&angle));
    if angle < 23.0 || angle > 337.0 {
        DirectionModifier::UTurn
    } else if angle <= 67.0 {
        DirectionModifier::SharpRight
    } else if angle < 113.0 {
        DirectionModifier::Right
    } else if angle <= 157.0 {
        DirectionModifier::SlightRight
    } else if angle < 203.0 {
        DirectionModifier::Straight
    } else if angle <= 247.0 {
        DirectionModifier::SlightLeft
    } else if angle < 293.0 {
        DirectionModifier::Left
    } else {
        DirectionModifier::SharpLeft
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnInstruction {
    pub kind: TurnType,
    pub direction: DirectionModifier,
    /// Turn crosses into an access-restricted edge and carries the penalty.
    pub access_restricted: bool,
}

const ACCESS_RESTRICTION_FLAG: u16 = 0x8000;

impl TurnInstruction {
    pub fn new(kind: TurnType, direction: DirectionModifier) -> Self {
        Self {
            kind,
            direction,
            access_restricted: false,
        }
    }

    pub fn no_turn() -> Self {
        Self::new(TurnType::NoTurn, DirectionModifier::Straight)
    }

    pub fn uturn() -> Self {
        Self::new(TurnType::UTurn, DirectionModifier::UTurn)
    }

    /// Wire layout: kind in the low byte, direction in bits 8..15, flag in
    /// the top bit.
    pub fn pack(&self) -> u16 {
        u16::from(self.kind as u8)
            | (u16::from(self.direction as u8) << 8)
            | if self.access_restricted {
                ACCESS_RESTRICTION_FLAG
            } else {
                0
            }
    }

    pub fn unpack(raw: u16) -> Result<Self> {
        let kind = TurnType::from_u8((raw & 0xFF) as u8).ok_or_else(|| {
            RoadloomError::IntegrityViolation(format!("unknown turn type in 0x{raw:04x}"))
        })?;
        let direction = DirectionModifier::from_u8(((raw >> 8) & 0x7F) as u8).ok_or_else(|| {
            RoadloomError::IntegrityViolation(format!("unknown direction in 0x{raw:04x}"))
        })?;
        Ok(Self {
            kind,
            direction,
            access_restricted: raw & ACCESS_RESTRICTION_FLAG != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_bands() {
        assert_eq!(direction_from_angle(0.0), DirectionModifier::UTurn);
        assert_eq!(direction_from_angle(90.0), DirectionModifier::Right);
        assert_eq!(direction_from_angle(150.0), DirectionModifier::SlightRight);
        assert_eq!(direction_from_angle(180.0), DirectionModifier::Straight);
        assert_eq!(direction_from_angle(210.0), DirectionModifier::SlightLeft);
        assert_eq!(direction_from_angle(270.0), DirectionModifier::Left);
        assert_eq!(direction_from_angle(310.0), DirectionModifier::SharpLeft);
        assert_eq!(direction_from_angle(359.0), DirectionModifier::UTurn);
    }

    #[test]
    fn test_pack_round_trip() {
        let mut instruction =
            TurnInstruction::new(TurnType::OffRamp, DirectionModifier::SlightRight);
        instruction.access_restricted = true;
        let unpacked = TurnInstruction::unpack(instruction.pack()).unwrap();
        assert_eq!(unpacked, instruction);

        let plain = TurnInstruction::uturn();
        assert_eq!(TurnInstruction::unpack(plain.pack()).unwrap(), plain);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(TurnInstruction::unpack(0x00FF).is_err());
    }
}

//! Register value encoding
//!
//! Multi-byte registers are little-endian. Position correction uses an
//! offset-sign format: magnitudes go in as-is, negative values are stored as
//! `magnitude + 0x800`.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Encoder steps per revolution
pub const STEPS_PER_TURN: u16 = 4096;

/// Largest valid position value (12-bit)
pub const MAX_POSITION: u16 = 0x0FFF;

/// Largest correction magnitude
pub const MAX_CORRECTION: i16 = 2047;

const CORRECTION_SIGN: u16 = 0x800;
const CORRECTION_FIELD: u16 = 0x0FFF;

/// Split a value into (low, high) bytes
pub fn encode_u16_le(value: u16) -> (u8, u8) {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, value);
    (bytes[0], bytes[1])
}

/// Join (low, high) bytes into a value
pub fn decode_u16_le(low: u8, high: u8) -> u16 {
    LittleEndian::read_u16(&[low, high])
}

/// Encode a position correction in offset-sign form
pub fn encode_correction(correction: i16) -> Result<u16, ProtocolError> {
    if !(-MAX_CORRECTION..=MAX_CORRECTION).contains(&correction) {
        return Err(ProtocolError::range(
            "position correction",
            correction as i64,
            -(MAX_CORRECTION as i64),
            MAX_CORRECTION as i64,
        ));
    }

    if correction >= 0 {
        Ok(correction as u16)
    } else {
        Ok(correction.unsigned_abs() + CORRECTION_SIGN)
    }
}

/// Decode a position correction from offset-sign form
///
/// The field is 12 bits wide; anything above `0x0FFF` is rejected.
pub fn decode_correction(raw: u16) -> Result<i16, ProtocolError> {
    if raw > CORRECTION_FIELD {
        return Err(ProtocolError::range(
            "position correction register",
            raw as i64,
            0,
            CORRECTION_FIELD as i64,
        ));
    }

    let value = raw as i32;
    if raw > CORRECTION_SIGN {
        Ok(-(value - CORRECTION_SIGN as i32) as i16)
    } else {
        Ok(value as i16)
    }
}

/// Reject positions that do not fit the 12-bit encoder range
pub fn check_position(position: u16) -> Result<u16, ProtocolError> {
    if position > MAX_POSITION {
        return Err(ProtocolError::range(
            "position",
            position as i64,
            0,
            MAX_POSITION as i64,
        ));
    }
    Ok(position)
}

/// Convert encoder steps to degrees
pub fn steps_to_degrees(steps: u16) -> f32 {
    steps as f32 * 360.0 / STEPS_PER_TURN as f32
}

/// Convert degrees to encoder steps, wrapping into one turn
pub fn degrees_to_steps(degrees: f32) -> u16 {
    let turns = degrees.rem_euclid(360.0) / 360.0;
    ((turns * STEPS_PER_TURN as f32).round() as u16) % STEPS_PER_TURN
}

/// Position, velocity and load read in one 6-byte block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionSample {
    /// Encoder position (0..=4095 in normal operation)
    pub position: u16,
    /// Signed velocity in steps/s
    pub velocity: i16,
    /// Signed load
    pub load: i16,
}

impl PositionSample {
    /// Byte width of the block at PRESENT_POSITION
    pub const SIZE: usize = 6;

    /// Decode three little-endian pairs
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::ResponseLength {
                expected: Self::SIZE,
                got: bytes.len(),
            });
        }

        Ok(Self {
            position: LittleEndian::read_u16(&bytes[0..2]),
            velocity: LittleEndian::read_i16(&bytes[2..4]),
            load: LittleEndian::read_i16(&bytes[4..6]),
        })
    }

    /// Position in degrees
    pub fn degrees(&self) -> f32 {
        steps_to_degrees(self.position)
    }
}

/// Full status snapshot of one servo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServoStatus {
    /// Encoder position
    pub position: u16,
    /// Signed velocity in steps/s
    pub velocity: i16,
    /// Signed load
    pub load: i16,
    /// Supply voltage in 0.1 V units
    pub voltage: u8,
    /// Temperature in degrees Celsius
    pub temperature: u8,
    /// Present current
    pub current: u16,
    /// Servo is still moving
    pub moving: bool,
}

impl ServoStatus {
    /// Supply voltage in volts
    pub fn volts(&self) -> f32 {
        self.voltage as f32 / 10.0
    }
}

//! Tetromino piece kinds and the active-piece pose.
//!
//! Wire encodings:
//! - piece kind: 3 bits (7 valid values, the 8th is a schema violation)
//! - pose: 11 bits = rotation 2 + x 4 (offset by +2) + y 5 (offset by +2)

use crate::codec::{BitReader, BitWriter, CodecResult};
use crate::packet::ProtocolError;
use serde::{Deserialize, Serialize};

/// Wire width of a tetromino kind.
pub const TETROMINO_BITS: usize = 3;

/// Wire width of a piece pose.
pub const POSE_BITS: usize = 11;

/// The seven tetromino kinds.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tetromino {
    I = 0,
    O = 1,
    L = 2,
    J = 3,
    T = 4,
    S = 5,
    Z = 6,
}

impl TryFrom<u8> for Tetromino {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::I),
            1 => Ok(Self::O),
            2 => Ok(Self::L),
            3 => Ok(Self::J),
            4 => Ok(Self::T),
            5 => Ok(Self::S),
            6 => Ok(Self::Z),
            _ => Err(ProtocolError::InvalidField {
                field: "tetromino",
                value: u64::from(value),
            }),
        }
    }
}

impl Tetromino {
    pub(crate) fn encode(self, writer: &mut BitWriter) -> CodecResult<()> {
        writer.write_bits(self as u64, TETROMINO_BITS)
    }

    pub(crate) fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let raw = reader.read_bits(TETROMINO_BITS)? as u8;
        Self::try_from(raw)
    }
}

/// Position and rotation of the active piece.
///
/// Coordinates can go slightly out of the visible board while a piece spawns
/// or rotates against a wall, so x spans -2..=13 and y spans -2..=29; both
/// are stored with a +2 offset to stay unsigned on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiecePose {
    /// Rotation state (0-3).
    pub rotation: u8,
    /// Column of the piece origin (-2..=13).
    pub x: i8,
    /// Row of the piece origin (-2..=29).
    pub y: i8,
}

impl PiecePose {
    /// Validate the pose against its wire ranges.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.rotation > 3 {
            return Err(ProtocolError::InvalidField {
                field: "pose.rotation",
                value: u64::from(self.rotation),
            });
        }
        if !(-2..=13).contains(&self.x) {
            return Err(ProtocolError::InvalidField {
                field: "pose.x",
                value: self.x.unsigned_abs() as u64,
            });
        }
        if !(-2..=29).contains(&self.y) {
            return Err(ProtocolError::InvalidField {
                field: "pose.y",
                value: self.y.unsigned_abs() as u64,
            });
        }
        Ok(())
    }

    pub(crate) fn encode(&self, writer: &mut BitWriter) -> Result<(), ProtocolError> {
        self.validate()?;
        writer.write_bits(u64::from(self.rotation), 2)?;
        writer.write_bits((self.x + 2) as u64, 4)?;
        writer.write_bits((self.y + 2) as u64, 5)?;
        Ok(())
    }

    pub(crate) fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let rotation = reader.read_bits(2)? as u8;
        let x = reader.read_bits(4)? as i8 - 2;
        let y = reader.read_bits(5)? as i8 - 2;
        Ok(Self { rotation, x, y })
    }
}

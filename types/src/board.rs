//! Tetris board state and its 400-bit wire layout.

use crate::codec::{BitReader, BitWriter, CodecResult};
use crate::packet::ProtocolError;
use serde::{Deserialize, Serialize};

/// Board width in cells.
pub const BOARD_WIDTH: usize = 10;

/// Board height in cells.
pub const BOARD_HEIGHT: usize = 20;

/// Wire width of a full board: 200 cells at 2 bits each.
pub const BOARD_BITS: usize = BOARD_WIDTH * BOARD_HEIGHT * 2;

/// Cell color, 2 bits on the wire.
///
/// Colors are level-relative (the palette cycles with the level), so the
/// protocol only distinguishes the three mino classes plus empty.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellColor {
    #[default]
    Empty = 0,
    Primary = 1,
    Secondary = 2,
    White = 3,
}

impl From<u8> for CellColor {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0 => Self::Empty,
            1 => Self::Primary,
            2 => Self::Secondary,
            _ => Self::White,
        }
    }
}

/// A 20x10 grid of cell colors, row-major from the top-left.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [[CellColor; BOARD_WIDTH]; BOARD_HEIGHT],
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl Board {
    /// An all-empty board.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            cells: [[CellColor::Empty; BOARD_WIDTH]; BOARD_HEIGHT],
        }
    }

    /// Cell color at (row, col).
    ///
    /// # Panics
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> CellColor {
        self.cells[row][col]
    }

    /// Set the cell color at (row, col).
    ///
    /// # Panics
    /// Panics if the coordinates are out of bounds.
    pub fn set(&mut self, row: usize, col: usize, color: CellColor) {
        self.cells[row][col] = color;
    }

    /// Number of non-empty cells.
    #[must_use]
    pub fn count_minos(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| **cell != CellColor::Empty)
            .count()
    }

    pub(crate) fn encode(&self, writer: &mut BitWriter) -> CodecResult<()> {
        for row in &self.cells {
            for cell in row {
                writer.write_bits(*cell as u64, 2)?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let mut board = Self::empty();
        for row in 0..BOARD_HEIGHT {
            for col in 0..BOARD_WIDTH {
                board.cells[row][col] = CellColor::from(reader.read_bits(2)? as u8);
            }
        }
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn board_wire_layout_is_400_bits() {
        let mut writer = BitWriter::new();
        Board::empty().encode(&mut writer).unwrap();
        assert_eq!(writer.bit_len(), BOARD_BITS);
    }

    #[test]
    fn board_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut board = Board::empty();
        for row in 0..BOARD_HEIGHT {
            for col in 0..BOARD_WIDTH {
                board.set(row, col, CellColor::from(rng.gen_range(0..4u8)));
            }
        }

        let mut writer = BitWriter::new();
        board.encode(&mut writer).unwrap();
        let bytes = writer.to_bytes();
        let mut reader = BitReader::from_bytes(&bytes);
        assert_eq!(Board::decode(&mut reader).unwrap(), board);
    }

    #[test]
    fn count_minos_ignores_empty_cells() {
        let mut board = Board::empty();
        assert_eq!(board.count_minos(), 0);
        board.set(19, 0, CellColor::Primary);
        board.set(19, 1, CellColor::White);
        assert_eq!(board.count_minos(), 2);
    }
}

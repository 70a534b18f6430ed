//! Compact bitwise encoding primitives.
//!
//! The wire protocol packs many tiny game events into a single byte buffer
//! per network tick, so fields are written at arbitrary bit widths with no
//! inline metadata. Widths are a contract of the packet schema: the width
//! used to write a field must be used to read it back.
//!
//! # Bit Order Convention
//!
//! - **Within the stream**: MSB-first (the first bit written lands in the
//!   most significant position of the first byte).
//! - **Padding**: `to_bytes` zero-pads to the next byte boundary. Padding
//!   bits are never semantically read back; the stream sentinel guarantees
//!   readers stop before reaching them.

use thiserror::Error;

/// Errors that can occur during bit encoding/decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Value does not fit in the declared unsigned bit width.
    #[error("value {value} does not fit in {width} unsigned bits")]
    ValueTooWide { value: u64, width: usize },

    /// Buffer underflow during read.
    #[error("buffer underflow: attempted to read {attempted} bits, only {available} available")]
    Underflow { attempted: usize, available: usize },

    /// Bit width outside the supported 1-64 range.
    #[error("bit width {width} out of range (1-64)")]
    InvalidBitWidth { width: usize },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Bitwise writer for compact encoding.
///
/// Accumulates bits MSB-first. All writes are width-checked up front so a
/// mismatched schema width fails fast instead of silently corrupting the
/// stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitWriter {
    /// Accumulated bytes; trailing bits beyond `bit_len` are zero.
    buffer: Vec<u8>,
    /// Total number of bits written.
    bit_len: usize,
}

impl BitWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of bits written.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    /// Write a single bit.
    pub fn write_bool(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.buffer.push(0);
        }
        if bit {
            let last = self.buffer.len() - 1;
            self.buffer[last] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Write an unsigned integer at the declared bit width, MSB-first.
    ///
    /// # Errors
    /// `CodecError::ValueTooWide` if `value >= 2^width`;
    /// `CodecError::InvalidBitWidth` if `width` is 0 or exceeds 64.
    pub fn write_bits(&mut self, value: u64, width: usize) -> CodecResult<()> {
        if width == 0 || width > 64 {
            return Err(CodecError::InvalidBitWidth { width });
        }
        if width < 64 && value >> width != 0 {
            return Err(CodecError::ValueTooWide { value, width });
        }
        for i in (0..width).rev() {
            self.write_bool((value >> i) & 1 != 0);
        }
        Ok(())
    }

    /// Append another writer's bits, in order.
    ///
    /// Pure bit concatenation; the appended stream is not re-aligned to a
    /// byte boundary.
    pub fn append(&mut self, other: &BitWriter) {
        for i in 0..other.bit_len {
            self.write_bool(other.bit(i));
        }
    }

    /// Copy `count` bits from a reader's current position, advancing it.
    ///
    /// Used to recover the raw bit range a packet decode consumed.
    pub fn append_from_reader(&mut self, reader: &mut BitReader<'_>, count: usize) -> CodecResult<()> {
        for _ in 0..count {
            self.write_bool(reader.read_bool()?);
        }
        Ok(())
    }

    fn bit(&self, index: usize) -> bool {
        debug_assert!(index < self.bit_len);
        (self.buffer[index / 8] >> (7 - index % 8)) & 1 != 0
    }

    /// Finalize into bytes, zero-padded to the next byte boundary.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        // Bits beyond bit_len are already zero.
        self.buffer.clone()
    }
}

/// Bitwise reader for compact decoding.
///
/// Iterator-style cursor over a borrowed byte buffer; all reads are checked
/// for underflow. The bit count available is `bytes.len() * 8` regardless of
/// real content length: callers rely on the sentinel opcode, not this count,
/// to know when meaningful data ends.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    /// Absolute bit position of the cursor.
    pos: usize,
    /// Absolute bit position one past the readable range.
    end: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader over a byte buffer.
    #[must_use]
    pub fn from_bytes(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            pos: 0,
            end: buffer.len() * 8,
        }
    }

    /// Returns the number of bits remaining to read.
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        self.end - self.pos
    }

    /// Returns true if all bits have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0
    }

    /// Read a single bit.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        if self.pos >= self.end {
            return Err(CodecError::Underflow {
                attempted: 1,
                available: 0,
            });
        }
        let bit = (self.buffer[self.pos / 8] >> (7 - self.pos % 8)) & 1 != 0;
        self.pos += 1;
        Ok(bit)
    }

    /// Read an unsigned integer at the declared bit width, MSB-first.
    ///
    /// # Errors
    /// `CodecError::Underflow` if fewer than `width` bits remain;
    /// `CodecError::InvalidBitWidth` if `width` is 0 or exceeds 64.
    pub fn read_bits(&mut self, width: usize) -> CodecResult<u64> {
        if width == 0 || width > 64 {
            return Err(CodecError::InvalidBitWidth { width });
        }
        let available = self.remaining_bits();
        if width > available {
            return Err(CodecError::Underflow {
                attempted: width,
                available,
            });
        }
        let mut value: u64 = 0;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.read_bool()?);
        }
        Ok(value)
    }

    /// Peek at the next `width` bits without consuming them.
    pub fn peek_bits(&self, width: usize) -> CodecResult<u64> {
        let mut copy = self.clone();
        copy.read_bits(width)
    }

    /// Split off a bounded reader over the next `width` bits, advancing the
    /// cursor past them.
    ///
    /// Packet decoders use this so a schema that reads too few or too many
    /// bits is caught instead of desynchronizing the rest of the stream.
    pub fn sub_reader(&mut self, width: usize) -> CodecResult<BitReader<'a>> {
        let available = self.remaining_bits();
        if width > available {
            return Err(CodecError::Underflow {
                attempted: width,
                available,
            });
        }
        let sub = BitReader {
            buffer: self.buffer,
            pos: self.pos,
            end: self.pos + width,
        };
        self.pos += width;
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3).unwrap();
        writer.write_bits(200, 8).unwrap();
        writer.write_bits(0, 1).unwrap();
        writer.write_bits(67_108_863, 26).unwrap();
        let bytes = writer.to_bytes();

        let mut reader = BitReader::from_bytes(&bytes);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(8).unwrap(), 200);
        assert_eq!(reader.read_bits(1).unwrap(), 0);
        assert_eq!(reader.read_bits(26).unwrap(), 67_108_863);
    }

    #[test]
    fn msb_first_within_byte() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1, 1).unwrap();
        writer.write_bits(0b01, 2).unwrap();
        writer.write_bits(0b10110, 5).unwrap();
        // Bits in order: 1 01 10110 -> 0b1011_0110
        assert_eq!(writer.to_bytes(), vec![0b1011_0110]);
    }

    #[test]
    fn value_too_wide_is_rejected() {
        let mut writer = BitWriter::new();
        let err = writer.write_bits(8, 3).unwrap_err();
        assert_eq!(err, CodecError::ValueTooWide { value: 8, width: 3 });
        // The failed write must not have produced partial bits.
        assert_eq!(writer.bit_len(), 0);
    }

    #[test]
    fn width_64_accepts_max_value() {
        let mut writer = BitWriter::new();
        writer.write_bits(u64::MAX, 64).unwrap();
        let bytes = writer.to_bytes();
        let mut reader = BitReader::from_bytes(&bytes);
        assert_eq!(reader.read_bits(64).unwrap(), u64::MAX);
    }

    #[test]
    fn zero_and_oversized_widths_are_rejected() {
        let mut writer = BitWriter::new();
        assert!(matches!(
            writer.write_bits(0, 0),
            Err(CodecError::InvalidBitWidth { width: 0 })
        ));
        assert!(matches!(
            writer.write_bits(0, 65),
            Err(CodecError::InvalidBitWidth { width: 65 })
        ));
        let mut reader = BitReader::from_bytes(&[0xFF]);
        assert!(matches!(
            reader.read_bits(0),
            Err(CodecError::InvalidBitWidth { width: 0 })
        ));
    }

    #[test]
    fn underflow_reports_available_bits() {
        let mut reader = BitReader::from_bytes(&[0xAB]);
        reader.read_bits(5).unwrap();
        let err = reader.read_bits(8).unwrap_err();
        assert_eq!(
            err,
            CodecError::Underflow {
                attempted: 8,
                available: 3
            }
        );
    }

    #[test]
    fn to_bytes_pads_with_zeros() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b111, 3).unwrap();
        assert_eq!(writer.to_bytes(), vec![0b1110_0000]);

        let mut writer = BitWriter::new();
        writer.write_bits(0xAB, 8).unwrap();
        writer.write_bool(true);
        assert_eq!(writer.to_bytes(), vec![0xAB, 0x80]);
    }

    #[test]
    fn from_bytes_exposes_all_bits() {
        let reader = BitReader::from_bytes(&[0x00, 0x00, 0x00]);
        assert_eq!(reader.remaining_bits(), 24);
    }

    #[test]
    fn append_is_pure_bit_concatenation() {
        let mut left = BitWriter::new();
        left.write_bits(0b101, 3).unwrap();
        let mut right = BitWriter::new();
        right.write_bits(0b0110, 4).unwrap();
        left.append(&right);
        assert_eq!(left.bit_len(), 7);
        // 101 0110 -> 0b1010_1100
        assert_eq!(left.to_bytes(), vec![0b1010_1100]);
    }

    #[test]
    fn append_does_not_byte_align_mid_stream() {
        let mut left = BitWriter::new();
        left.write_bits(1, 1).unwrap();
        let mut right = BitWriter::new();
        right.write_bits(0xFF, 8).unwrap();
        left.append(&right);
        assert_eq!(left.bit_len(), 9);
        assert_eq!(left.to_bytes(), vec![0b1111_1111, 0b1000_0000]);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut reader = BitReader::from_bytes(&[0b1010_0000]);
        assert_eq!(reader.peek_bits(3).unwrap(), 0b101);
        assert_eq!(reader.peek_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
    }

    #[test]
    fn sub_reader_bounds_reads() {
        let mut reader = BitReader::from_bytes(&[0xFF, 0xFF]);
        let mut sub = reader.sub_reader(5).unwrap();
        assert_eq!(sub.read_bits(5).unwrap(), 0b11111);
        assert!(matches!(sub.read_bool(), Err(CodecError::Underflow { .. })));
        // The parent cursor advanced past the sub range.
        assert_eq!(reader.remaining_bits(), 11);
    }

    #[test]
    fn append_from_reader_recovers_raw_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b110101, 6).unwrap();
        let bytes = writer.to_bytes();

        let mut reader = BitReader::from_bytes(&bytes);
        let mut recovered = BitWriter::new();
        recovered.append_from_reader(&mut reader, 6).unwrap();
        assert_eq!(recovered.bit_len(), 6);
        assert_eq!(recovered.to_bytes(), vec![0b1101_0100]);
    }
}

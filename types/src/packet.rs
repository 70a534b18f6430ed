//! Typed packet definitions and opcode dispatch.
//!
//! Every packet is `opcode (4 bits) + payload (fixed bits)`. The opcode to
//! payload-length mapping is a static, protocol-wide table: the framing is
//! schema-driven rather than length-prefixed, so a decoder that does not
//! recognize an opcode cannot skip it and must treat the stream as
//! desynchronized. Schema changes are therefore not compatible across
//! client/server versions, which is acceptable because both ship from one
//! deployable unit.
//!
//! The original runtime opcode->handler map is collapsed into a closed enum:
//! every known opcode is an explicit match arm and the unknown case is a
//! single fatal branch.

use crate::board::{Board, BOARD_BITS};
use crate::codec::{BitReader, BitWriter, CodecError};
use crate::tetromino::{PiecePose, Tetromino, POSE_BITS, TETROMINO_BITS};
use thiserror::Error;

/// Wire width of an opcode.
pub const OPCODE_BITS: usize = 4;

/// Wire width of timed-packet millisecond deltas.
pub const DELTA_MS_BITS: usize = 12;

/// Wire width of a game score (caps at 67,108,863).
pub const SCORE_BITS: usize = 26;

/// Maximum chat message length in bytes.
pub const CHAT_MAX_BYTES: usize = 80;

/// Errors raised by packet encode/decode.
///
/// All of these mark the connection as desynchronized: the peer should be
/// dropped and prompted to reconnect rather than partially trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode not present in the protocol table. Fatal: there is no generic
    /// skip mechanism for unrecognized packets.
    #[error("unknown opcode {opcode}")]
    UnknownOpcode { opcode: u8 },

    /// Encoded or decoded payload length disagrees with the static table.
    #[error("packet {packet} payload length mismatch: expected {expected} bits, got {got}")]
    PayloadLengthMismatch {
        packet: &'static str,
        expected: usize,
        got: usize,
    },

    /// Payload decoded but a field failed schema-level validation.
    #[error("field {field} has out-of-range value {value}")]
    InvalidField { field: &'static str, value: u64 },

    /// Underlying bit-level failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Packet opcodes, 4 bits on the wire.
///
/// The sentinel occupies the reserved highest value of the opcode space so
/// real opcodes can grow upward without renumbering it.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    GameStart = 0,
    GameEnd = 1,
    GamePlacement = 2,
    GameFullBoard = 3,
    GameAbbrBoard = 4,
    GameRecovery = 5,
    GameCountdown = 6,
    Chat = 7,
    Ready = 8,
    Topout = 9,
    MatchPointResult = 10,
    /// End-of-stream sentinel; carries no payload.
    LastPacket = 15,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::GameStart),
            1 => Ok(Self::GameEnd),
            2 => Ok(Self::GamePlacement),
            3 => Ok(Self::GameFullBoard),
            4 => Ok(Self::GameAbbrBoard),
            5 => Ok(Self::GameRecovery),
            6 => Ok(Self::GameCountdown),
            7 => Ok(Self::Chat),
            8 => Ok(Self::Ready),
            9 => Ok(Self::Topout),
            10 => Ok(Self::MatchPointResult),
            15 => Ok(Self::LastPacket),
            _ => Err(ProtocolError::UnknownOpcode { opcode: value }),
        }
    }
}

impl Opcode {
    /// Fixed payload bit-length for this opcode.
    ///
    /// Used to recover the raw consumed bit range for diagnostics; decode
    /// itself consumes exactly this many bits through explicit fields.
    #[must_use]
    pub const fn content_bits(self) -> usize {
        match self {
            Self::GameStart => 8 + 2 * TETROMINO_BITS,
            Self::GameEnd => 0,
            Self::GamePlacement => DELTA_MS_BITS + TETROMINO_BITS + POSE_BITS + 4,
            Self::GameFullBoard => DELTA_MS_BITS + BOARD_BITS,
            Self::GameAbbrBoard => DELTA_MS_BITS + POSE_BITS,
            Self::GameRecovery => 8 + 2 * TETROMINO_BITS + BOARD_BITS + SCORE_BITS + 8 + 16 + 4,
            Self::GameCountdown => DELTA_MS_BITS + 4,
            Self::Chat => 7 + CHAT_MAX_BYTES * 8,
            Self::Ready => 1,
            Self::Topout => 1 + SCORE_BITS,
            Self::MatchPointResult => 4 + 2 * SCORE_BITS,
            Self::LastPacket => 0,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GameStart => "GameStart",
            Self::GameEnd => "GameEnd",
            Self::GamePlacement => "GamePlacement",
            Self::GameFullBoard => "GameFullBoard",
            Self::GameAbbrBoard => "GameAbbrBoard",
            Self::GameRecovery => "GameRecovery",
            Self::GameCountdown => "GameCountdown",
            Self::Chat => "Chat",
            Self::Ready => "Ready",
            Self::Topout => "Topout",
            Self::MatchPointResult => "MatchPointResult",
            Self::LastPacket => "LastPacket",
        }
    }
}

/// Start of a game: starting level plus the first two pieces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameStart {
    pub level: u8,
    pub current: Tetromino,
    pub next: Tetromino,
}

/// A piece placement, relative to the previous timed packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GamePlacement {
    /// Milliseconds since the previous timed packet (12 bits).
    pub delta_ms: u16,
    /// Piece after the current and next piece.
    pub next_next: Tetromino,
    /// Final pose of the placed piece.
    pub pose: PiecePose,
    /// Pushdown points scored on the placement (0-15).
    pub pushdown: u8,
}

/// Full board state, for changes where the active piece cannot be inferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameFullBoard {
    pub delta_ms: u16,
    pub board: Board,
}

/// Abbreviated board delta: just the active piece pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameAbbrBoard {
    pub delta_ms: u16,
    pub pose: PiecePose,
}

/// Everything needed to resynchronize a spectator mid-game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameRecovery {
    pub start_level: u8,
    pub current: Tetromino,
    pub next: Tetromino,
    /// Board without the active piece.
    pub isolated_board: Board,
    /// Score, capped at 2^26 - 1.
    pub score: u32,
    pub level: u8,
    pub lines: u16,
    /// Current countdown value; 0 means not in countdown.
    pub countdown: u8,
}

/// Countdown tick; sent as a timed packet because the board may not update
/// while counting down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameCountdown {
    pub delta_ms: u16,
    /// Countdown value (0-15); 0 means not in countdown.
    pub countdown: u8,
}

/// In-room chat line.
///
/// The payload is padded to [`CHAT_MAX_BYTES`] so the protocol-wide fixed
/// payload-length table stays total; chat is rare enough that the padding
/// does not matter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chat {
    pub message: String,
}

/// Ready/unready toggle while waiting for a match point to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ready {
    pub ready: bool,
}

/// Topout or voluntary forfeit, with the final score of the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Topout {
    pub forfeit: bool,
    pub score: u32,
}

/// Server-authoritative broadcast of a finished match point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchPointResult {
    /// Index of the point within the match (0-15).
    pub point_index: u8,
    pub score_player1: u32,
    pub score_player2: u32,
}

/// A protocol packet: one tagged variant per opcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    GameStart(GameStart),
    GameEnd,
    GamePlacement(GamePlacement),
    GameFullBoard(GameFullBoard),
    GameAbbrBoard(GameAbbrBoard),
    GameRecovery(GameRecovery),
    GameCountdown(GameCountdown),
    Chat(Chat),
    Ready(Ready),
    Topout(Topout),
    MatchPointResult(MatchPointResult),
    /// End-of-stream sentinel appended by the assembler.
    LastPacket,
}

impl Packet {
    /// The opcode of this packet.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::GameStart(_) => Opcode::GameStart,
            Self::GameEnd => Opcode::GameEnd,
            Self::GamePlacement(_) => Opcode::GamePlacement,
            Self::GameFullBoard(_) => Opcode::GameFullBoard,
            Self::GameAbbrBoard(_) => Opcode::GameAbbrBoard,
            Self::GameRecovery(_) => Opcode::GameRecovery,
            Self::GameCountdown(_) => Opcode::GameCountdown,
            Self::Chat(_) => Opcode::Chat,
            Self::Ready(_) => Opcode::Ready,
            Self::Topout(_) => Opcode::Topout,
            Self::MatchPointResult(_) => Opcode::MatchPointResult,
            Self::LastPacket => Opcode::LastPacket,
        }
    }

    /// Encode opcode + payload into a fresh bit buffer.
    ///
    /// The payload bit-length is checked against the static table, so a
    /// schema/table disagreement fails at encode time rather than corrupting
    /// the stream for the peer.
    pub fn encode(&self) -> Result<BitWriter, ProtocolError> {
        let opcode = self.opcode();
        let mut writer = BitWriter::new();
        writer.write_bits(opcode as u64, OPCODE_BITS)?;

        let mut payload = BitWriter::new();
        self.encode_payload(&mut payload)?;
        if payload.bit_len() != opcode.content_bits() {
            return Err(ProtocolError::PayloadLengthMismatch {
                packet: opcode.name(),
                expected: opcode.content_bits(),
                got: payload.bit_len(),
            });
        }

        writer.append(&payload);
        Ok(writer)
    }

    fn encode_payload(&self, w: &mut BitWriter) -> Result<(), ProtocolError> {
        match self {
            Self::GameStart(p) => {
                w.write_bits(u64::from(p.level), 8)?;
                p.current.encode(w)?;
                p.next.encode(w)?;
            }
            Self::GameEnd | Self::LastPacket => {}
            Self::GamePlacement(p) => {
                w.write_bits(u64::from(p.delta_ms), DELTA_MS_BITS)?;
                p.next_next.encode(w)?;
                p.pose.encode(w)?;
                w.write_bits(u64::from(p.pushdown), 4)?;
            }
            Self::GameFullBoard(p) => {
                w.write_bits(u64::from(p.delta_ms), DELTA_MS_BITS)?;
                p.board.encode(w)?;
            }
            Self::GameAbbrBoard(p) => {
                w.write_bits(u64::from(p.delta_ms), DELTA_MS_BITS)?;
                p.pose.encode(w)?;
            }
            Self::GameRecovery(p) => {
                w.write_bits(u64::from(p.start_level), 8)?;
                p.current.encode(w)?;
                p.next.encode(w)?;
                p.isolated_board.encode(w)?;
                w.write_bits(u64::from(p.score), SCORE_BITS)?;
                w.write_bits(u64::from(p.level), 8)?;
                w.write_bits(u64::from(p.lines), 16)?;
                w.write_bits(u64::from(p.countdown), 4)?;
            }
            Self::GameCountdown(p) => {
                w.write_bits(u64::from(p.delta_ms), DELTA_MS_BITS)?;
                w.write_bits(u64::from(p.countdown), 4)?;
            }
            Self::Chat(p) => {
                let bytes = p.message.as_bytes();
                if bytes.len() > CHAT_MAX_BYTES {
                    return Err(ProtocolError::InvalidField {
                        field: "chat.len",
                        value: bytes.len() as u64,
                    });
                }
                w.write_bits(bytes.len() as u64, 7)?;
                for i in 0..CHAT_MAX_BYTES {
                    w.write_bits(u64::from(bytes.get(i).copied().unwrap_or(0)), 8)?;
                }
            }
            Self::Ready(p) => {
                w.write_bool(p.ready);
            }
            Self::Topout(p) => {
                w.write_bool(p.forfeit);
                w.write_bits(u64::from(p.score), SCORE_BITS)?;
            }
            Self::MatchPointResult(p) => {
                w.write_bits(u64::from(p.point_index), 4)?;
                w.write_bits(u64::from(p.score_player1), SCORE_BITS)?;
                w.write_bits(u64::from(p.score_player2), SCORE_BITS)?;
            }
        }
        Ok(())
    }

    /// Decode one packet (opcode + payload) from the reader.
    ///
    /// The payload is decoded through a bounded sub-reader of exactly the
    /// table length, so a schema that under- or over-consumes is caught
    /// instead of desynchronizing the remainder of the stream.
    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        let opcode = Opcode::try_from(reader.read_bits(OPCODE_BITS)? as u8)?;
        let expected = opcode.content_bits();

        if expected == 0 {
            return Ok(match opcode {
                Opcode::GameEnd => Self::GameEnd,
                Opcode::LastPacket => Self::LastPacket,
                _ => unreachable!("only sentinel-like opcodes have empty payloads"),
            });
        }

        let mut content = reader.sub_reader(expected)?;
        let packet = Self::decode_payload(opcode, &mut content)?;
        if !content.is_empty() {
            return Err(ProtocolError::PayloadLengthMismatch {
                packet: opcode.name(),
                expected,
                got: expected - content.remaining_bits(),
            });
        }
        Ok(packet)
    }

    fn decode_payload(opcode: Opcode, r: &mut BitReader<'_>) -> Result<Self, ProtocolError> {
        Ok(match opcode {
            Opcode::GameStart => Self::GameStart(GameStart {
                level: r.read_bits(8)? as u8,
                current: Tetromino::decode(r)?,
                next: Tetromino::decode(r)?,
            }),
            Opcode::GamePlacement => Self::GamePlacement(GamePlacement {
                delta_ms: r.read_bits(DELTA_MS_BITS)? as u16,
                next_next: Tetromino::decode(r)?,
                pose: PiecePose::decode(r)?,
                pushdown: r.read_bits(4)? as u8,
            }),
            Opcode::GameFullBoard => Self::GameFullBoard(GameFullBoard {
                delta_ms: r.read_bits(DELTA_MS_BITS)? as u16,
                board: Board::decode(r)?,
            }),
            Opcode::GameAbbrBoard => Self::GameAbbrBoard(GameAbbrBoard {
                delta_ms: r.read_bits(DELTA_MS_BITS)? as u16,
                pose: PiecePose::decode(r)?,
            }),
            Opcode::GameRecovery => Self::GameRecovery(GameRecovery {
                start_level: r.read_bits(8)? as u8,
                current: Tetromino::decode(r)?,
                next: Tetromino::decode(r)?,
                isolated_board: Board::decode(r)?,
                score: r.read_bits(SCORE_BITS)? as u32,
                level: r.read_bits(8)? as u8,
                lines: r.read_bits(16)? as u16,
                countdown: r.read_bits(4)? as u8,
            }),
            Opcode::GameCountdown => Self::GameCountdown(GameCountdown {
                delta_ms: r.read_bits(DELTA_MS_BITS)? as u16,
                countdown: r.read_bits(4)? as u8,
            }),
            Opcode::Chat => {
                let len = r.read_bits(7)? as usize;
                if len > CHAT_MAX_BYTES {
                    return Err(ProtocolError::InvalidField {
                        field: "chat.len",
                        value: len as u64,
                    });
                }
                let mut bytes = Vec::with_capacity(CHAT_MAX_BYTES);
                for _ in 0..CHAT_MAX_BYTES {
                    bytes.push(r.read_bits(8)? as u8);
                }
                bytes.truncate(len);
                let message =
                    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidField {
                        field: "chat.utf8",
                        value: len as u64,
                    })?;
                Self::Chat(Chat { message })
            }
            Opcode::Ready => Self::Ready(Ready {
                ready: r.read_bool()?,
            }),
            Opcode::Topout => Self::Topout(Topout {
                forfeit: r.read_bool()?,
                score: r.read_bits(SCORE_BITS)? as u32,
            }),
            Opcode::MatchPointResult => Self::MatchPointResult(MatchPointResult {
                point_index: r.read_bits(4)? as u8,
                score_player1: r.read_bits(SCORE_BITS)? as u32,
                score_player2: r.read_bits(SCORE_BITS)? as u32,
            }),
            Opcode::GameEnd | Opcode::LastPacket => {
                unreachable!("empty payloads are handled before sub-reader creation")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::CellColor;

    fn round_trip(packet: Packet) {
        let encoded = packet.encode().unwrap();
        assert_eq!(
            encoded.bit_len(),
            OPCODE_BITS + packet.opcode().content_bits(),
            "encoded length must match the static table for {}",
            packet.opcode().name()
        );
        let bytes = encoded.to_bytes();
        let mut reader = BitReader::from_bytes(&bytes);
        assert_eq!(Packet::decode(&mut reader).unwrap(), packet);
    }

    #[test]
    fn game_start_round_trip() {
        round_trip(Packet::GameStart(GameStart {
            level: 18,
            current: Tetromino::T,
            next: Tetromino::I,
        }));
    }

    #[test]
    fn empty_payload_round_trips() {
        round_trip(Packet::GameEnd);
        round_trip(Packet::LastPacket);
    }

    #[test]
    fn placement_round_trip() {
        round_trip(Packet::GamePlacement(GamePlacement {
            delta_ms: 4095,
            next_next: Tetromino::Z,
            pose: PiecePose {
                rotation: 2,
                x: 7,
                y: -1,
            },
            pushdown: 15,
        }));
    }

    #[test]
    fn full_board_round_trip() {
        let mut board = Board::empty();
        board.set(19, 4, CellColor::Secondary);
        board.set(0, 0, CellColor::White);
        round_trip(Packet::GameFullBoard(GameFullBoard {
            delta_ms: 16,
            board,
        }));
    }

    #[test]
    fn abbr_board_round_trip() {
        round_trip(Packet::GameAbbrBoard(GameAbbrBoard {
            delta_ms: 33,
            pose: PiecePose {
                rotation: 0,
                x: -2,
                y: 29,
            },
        }));
    }

    #[test]
    fn recovery_round_trip() {
        round_trip(Packet::GameRecovery(GameRecovery {
            start_level: 19,
            current: Tetromino::S,
            next: Tetromino::O,
            isolated_board: Board::empty(),
            score: 67_108_863,
            level: 29,
            lines: 230,
            countdown: 0,
        }));
    }

    #[test]
    fn countdown_round_trip() {
        round_trip(Packet::GameCountdown(GameCountdown {
            delta_ms: 1000,
            countdown: 3,
        }));
    }

    #[test]
    fn chat_round_trip() {
        round_trip(Packet::Chat(Chat {
            message: "good luck, have fun".to_owned(),
        }));
        round_trip(Packet::Chat(Chat {
            message: String::new(),
        }));
    }

    #[test]
    fn ready_and_topout_round_trip() {
        round_trip(Packet::Ready(Ready { ready: true }));
        round_trip(Packet::Ready(Ready { ready: false }));
        round_trip(Packet::Topout(Topout {
            forfeit: true,
            score: 1_234_567,
        }));
    }

    #[test]
    fn match_point_result_round_trip() {
        round_trip(Packet::MatchPointResult(MatchPointResult {
            point_index: 2,
            score_player1: 120_000,
            score_player2: 98_400,
        }));
    }

    #[test]
    fn chat_longer_than_max_is_rejected() {
        let packet = Packet::Chat(Chat {
            message: "x".repeat(CHAT_MAX_BYTES + 1),
        });
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::InvalidField {
                field: "chat.len",
                ..
            })
        ));
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        // Opcodes 11-14 are unassigned.
        let mut writer = BitWriter::new();
        writer.write_bits(11, OPCODE_BITS).unwrap();
        let bytes = writer.to_bytes();
        let mut reader = BitReader::from_bytes(&bytes);
        assert_eq!(
            Packet::decode(&mut reader).unwrap_err(),
            ProtocolError::UnknownOpcode { opcode: 11 }
        );
    }

    #[test]
    fn invalid_tetromino_value_is_a_schema_error() {
        // Hand-build a GameStart whose `current` field holds the invalid
        // eighth piece value.
        let mut writer = BitWriter::new();
        writer.write_bits(Opcode::GameStart as u64, OPCODE_BITS).unwrap();
        writer.write_bits(18, 8).unwrap();
        writer.write_bits(7, TETROMINO_BITS).unwrap();
        writer.write_bits(0, TETROMINO_BITS).unwrap();
        let bytes = writer.to_bytes();
        let mut reader = BitReader::from_bytes(&bytes);
        assert!(matches!(
            Packet::decode(&mut reader),
            Err(ProtocolError::InvalidField {
                field: "tetromino",
                value: 7
            })
        ));
    }

    #[test]
    fn delta_wider_than_twelve_bits_fails_encode() {
        let packet = Packet::GameCountdown(GameCountdown {
            delta_ms: 4096,
            countdown: 0,
        });
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::Codec(CodecError::ValueTooWide { .. }))
        ));
    }

    #[test]
    fn truncated_payload_underflows() {
        let packet = Packet::Topout(Topout {
            forfeit: false,
            score: 500,
        });
        let bytes = packet.encode().unwrap().to_bytes();
        // Drop the last byte; the payload can no longer be fully read.
        let truncated = &bytes[..bytes.len() - 1];
        let mut reader = BitReader::from_bytes(truncated);
        assert!(matches!(
            Packet::decode(&mut reader),
            Err(ProtocolError::Codec(CodecError::Underflow { .. }))
        ));
    }
}

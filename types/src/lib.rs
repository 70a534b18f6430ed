//! Wire protocol and shared domain types for tetrion.
//!
//! The protocol packs many small, high-frequency game events (a piece
//! placement is a handful of bits) into one byte buffer per network tick.
//! Layers, leaves first:
//!
//! 1. [`codec`] — checked variable-width bit packing over a byte buffer.
//! 2. [`packet`] — typed packet schemas with a static opcode table.
//! 3. [`stream`] — frame assembly/disassembly with an end-of-stream
//!    sentinel and an optional player-index prefix for room multiplexing.
//!
//! [`multiplayer`] holds the room/match models both sides of the socket
//! agree on, including the derived match-scoring functions.

pub mod board;
pub mod codec;
pub mod multiplayer;
pub mod packet;
pub mod stream;
pub mod tetromino;

pub use board::{Board, CellColor, BOARD_HEIGHT, BOARD_WIDTH};
pub use codec::{BitReader, BitWriter, CodecError};
pub use multiplayer::{
    get_match_score, get_match_winner, MatchPoint, MatchResult, MultiplayerPlayerMode,
    MultiplayerPlayerState, MultiplayerRoomMode, MultiplayerRoomState, PlayerRole, RoomKind,
};
pub use packet::{Opcode, Packet, ProtocolError, OPCODE_BITS};
pub use stream::{
    PacketAssembler, PacketDisassembler, ReceivedPacket, MAX_PLAYERS_IN_ROOM, PLAYER_INDEX_BITS,
    SERVER_INDEX,
};
pub use tetromino::{PiecePose, Tetromino};

//! Room state machines, rating engine, and storage seam for tetrion.
//!
//! Everything here is deterministic and I/O-free: rooms consume explicit
//! inputs plus a caller-supplied clock and return events describing what
//! the server layer should broadcast, schedule, or persist. That keeps
//! every race the server can produce (a timer firing against a state
//! change, a packet racing a disconnect) testable as plain function calls.

pub mod multiplayer;
pub mod puzzle;
pub mod rating;
pub mod room;
pub mod solo;
pub mod storage;

pub use multiplayer::{
    MatchConfig, MultiplayerRoom, PlayerSeat, RoomSnapshot, COUNTDOWN_MS, DISCONNECT_GRACE_MS,
};
pub use puzzle::{PuzzleAttempt, PuzzleRoom};
pub use rating::{expected_score, k_factor, rating_delta, rating_delta_pair, MatchScore, RatingRecord};
pub use room::{MatchRatings, RoomError, RoomEvent, RoomId};
pub use solo::{SoloGame, SoloRoom};
pub use storage::{persist_room_events, persist_solo_game, MatchStore, MemoryStore, StorageError};

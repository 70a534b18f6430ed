//! Room identity, events, and rejection errors shared by the room state
//! machines.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tetrion_types::{MatchPoint, MultiplayerPlayerMode, MultiplayerRoomMode, PlayerRole};

use crate::rating::RatingRecord;

/// Unique room identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(Uuid);

impl RoomId {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RoomId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Finalized rating exchange of a ranked match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRatings {
    pub player1: RatingRecord,
    pub delta_player1: i32,
    pub player2: RatingRecord,
    pub delta_player2: i32,
}

/// Observable effects of a validated room transition.
///
/// The state machines return these instead of performing I/O; the server
/// layer turns them into broadcasts, timers, and storage writes.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// Room state changed; broadcast a fresh snapshot.
    StateChanged,
    /// Both players readied; the point starts when the deadline passes.
    CountdownStarted { deadline_ms: u64 },
    CountdownAborted,
    /// Countdown elapsed; all players are now in game.
    PointStarted,
    /// Both players died; one point of the match is settled.
    PointFinished { point: MatchPoint },
    /// A side reached the winning score. `ratings` is set for ranked play.
    MatchEnded {
        winner: PlayerRole,
        ratings: Option<MatchRatings>,
    },
    /// A player disconnected mid-game; they die if the deadline passes
    /// without a reconnect.
    GraceStarted { role: PlayerRole, deadline_ms: u64 },
    /// Grace elapsed; the player was topped out at their last known score.
    PlayerForcedDead { role: PlayerRole },
}

/// Rejected room transition.
///
/// These are protocol violations by a single client (or packets racing a
/// state change), so callers log them and drop the input rather than
/// tearing the room down.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room is {mode:?}, operation requires {required}")]
    WrongRoomMode {
        mode: MultiplayerRoomMode,
        required: &'static str,
    },
    #[error("{role:?} is {mode:?}, operation requires {required}")]
    WrongPlayerMode {
        role: PlayerRole,
        mode: MultiplayerPlayerMode,
        required: &'static str,
    },
    #[error("{role:?} is not the level picker")]
    NotLevelPicker { role: PlayerRole },
    #[error("start level {level} is not offered in this match")]
    InvalidStartLevel { level: u8 },
    #[error("puzzle attempt already submitted")]
    AttemptAlreadySubmitted,
}

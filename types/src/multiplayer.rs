//! Room and match models shared between server and clients.
//!
//! These are the read-only projections broadcast to clients after every
//! validated transition; clients never mutate them directly. The derived
//! scoring functions are deliberately recomputed from the full point
//! history so a match replayed from storage reproduces the identical
//! winner.

use serde::{Deserialize, Serialize};

/// The two player slots of a multiplayer room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerRole {
    Player1,
    Player2,
}

impl PlayerRole {
    /// The opposing slot.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Player1 => Self::Player2,
            Self::Player2 => Self::Player1,
        }
    }

    /// Index used for the stream player-index prefix.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::Player1 => 0,
            Self::Player2 => 1,
        }
    }
}

/// Kind of play session a room hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomKind {
    Solo,
    Multiplayer,
    Puzzle,
}

/// Room lifecycle within one match point. Strictly forward-only; a new
/// point restarts the cycle at `Waiting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiplayerRoomMode {
    Waiting,
    Countdown,
    Playing,
    MatchEnded,
}

/// Per-player mode within one match point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiplayerPlayerMode {
    NotReady,
    Ready,
    InGame,
    Dead,
}

/// Mutable per-player state within a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplayerPlayerState {
    pub mode: MultiplayerPlayerMode,
    pub score: u32,
}

impl Default for MultiplayerPlayerState {
    fn default() -> Self {
        Self {
            mode: MultiplayerPlayerMode::NotReady,
            score: 0,
        }
    }
}

/// Snapshot of room-level multiplayer state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplayerRoomState {
    pub start_level: u8,
    pub mode: MultiplayerRoomMode,
    /// Which player picks the starting level for the next point.
    pub level_picker: PlayerRole,
    pub player1: MultiplayerPlayerState,
    pub player2: MultiplayerPlayerState,
}

impl MultiplayerRoomState {
    #[must_use]
    pub fn player(&self, role: PlayerRole) -> &MultiplayerPlayerState {
        match role {
            PlayerRole::Player1 => &self.player1,
            PlayerRole::Player2 => &self.player2,
        }
    }

    pub fn player_mut(&mut self, role: PlayerRole) -> &mut MultiplayerPlayerState {
        match role {
            PlayerRole::Player1 => &mut self.player1,
            PlayerRole::Player2 => &mut self.player2,
        }
    }
}

/// One completed game within a best-of-N match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPoint {
    /// Seed both boards were dealt from.
    pub seed: String,
    pub game_id_player1: String,
    pub score_player1: u32,
    pub game_id_player2: String,
    pub score_player2: u32,
}

/// Accumulated result of a best-of-N match.
///
/// Match score and winner are derived from `points`, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: String,
    pub is_ranked: bool,
    pub seed: String,
    /// Derived match score a side must reach to win.
    pub winning_score: u32,
    pub valid_start_levels: Vec<u8>,
    pub points: Vec<MatchPoint>,
}

/// Fold the point history into per-side tallies.
///
/// A side scores a tally only on strict inequality; an exact tie
/// contributes to neither. This means a tie-dominated match can run past
/// its nominal length without producing a winner, which is intended.
#[must_use]
pub fn get_match_score(result: &MatchResult) -> (u32, u32) {
    let mut score1 = 0;
    let mut score2 = 0;
    for point in &result.points {
        if point.score_player1 > point.score_player2 {
            score1 += 1;
        } else if point.score_player1 < point.score_player2 {
            score2 += 1;
        }
    }
    (score1, score2)
}

/// First side whose derived tally reaches the winning score, if any.
#[must_use]
pub fn get_match_winner(result: &MatchResult) -> Option<PlayerRole> {
    let (score1, score2) = get_match_score(result);
    if score1 >= result.winning_score {
        Some(PlayerRole::Player1)
    } else if score2 >= result.winning_score {
        Some(PlayerRole::Player2)
    } else {
        None
    }
}

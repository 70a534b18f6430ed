//! Puzzle room: one rated puzzle attempt.
//!
//! Puzzles are rated as the player's opponent: solving a puzzle is a win
//! against it, failing is a loss to it, and the puzzle's own rating moves
//! with the complementary outcome. Hard puzzles thus drift up until they
//! beat most attempts, and a player's puzzle rating converges on the
//! difficulty they solve about half the time.

use tracing::debug;

use crate::rating::{rating_delta_pair, MatchScore, RatingRecord};
use crate::room::{RoomError, RoomId};

/// Settled outcome of one rated attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PuzzleAttempt {
    pub solved: bool,
    /// Player's record before the attempt.
    pub player: RatingRecord,
    pub delta_player: i32,
    /// Puzzle's record before the attempt.
    pub puzzle: RatingRecord,
    pub delta_puzzle: i32,
}

/// Room hosting a single rated puzzle attempt; submission is one-shot.
#[derive(Debug)]
pub struct PuzzleRoom {
    id: RoomId,
    user_id: String,
    puzzle_id: String,
    player: RatingRecord,
    puzzle: RatingRecord,
    submitted: bool,
}

impl PuzzleRoom {
    pub fn new(
        user_id: impl Into<String>,
        puzzle_id: impl Into<String>,
        player: RatingRecord,
        puzzle: RatingRecord,
    ) -> Self {
        Self {
            id: RoomId::new(),
            user_id: user_id.into(),
            puzzle_id: puzzle_id.into(),
            player,
            puzzle,
            submitted: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn puzzle_id(&self) -> &str {
        &self.puzzle_id
    }

    /// Settle the attempt. A second submission is rejected; the first
    /// result stands.
    pub fn submit(&mut self, solved: bool) -> Result<PuzzleAttempt, RoomError> {
        if self.submitted {
            return Err(RoomError::AttemptAlreadySubmitted);
        }
        self.submitted = true;

        let score = if solved {
            MatchScore::Win
        } else {
            MatchScore::Loss
        };
        let (delta_player, delta_puzzle) = rating_delta_pair(self.player, self.puzzle, score);
        debug!(
            room = %self.id,
            puzzle = %self.puzzle_id,
            solved,
            delta_player,
            delta_puzzle,
            "puzzle attempt settled"
        );
        Ok(PuzzleAttempt {
            solved,
            player: self.player,
            delta_player,
            puzzle: self.puzzle,
            delta_puzzle,
        })
    }
}

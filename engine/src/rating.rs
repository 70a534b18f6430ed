//! Rating update engine.
//!
//! Classic Elo with a variance of 800 (twice the textbook 400, so upsets
//! move ratings less) and a K factor that decays with matches played, from
//! 300 for a fresh account toward a floor of 60. Deltas are computed per
//! side with that side's own prior rating and match count; when the two
//! sides have different match counts the exchange is deliberately not
//! zero-sum.

use serde::{Deserialize, Serialize};

/// Rating-difference scale of the expected-score curve.
const ELO_VARIANCE: f64 = 800.0;

/// K-factor floor reached as the match count grows.
const K_FLOOR: f64 = 60.0;

/// Outcome of one match from a single side's perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchScore {
    Loss,
    Draw,
    Win,
}

impl MatchScore {
    /// Actual score fed into the Elo update.
    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Self::Loss => 0.0,
            Self::Draw => 0.5,
            Self::Win => 1.0,
        }
    }

    /// The opposing side's outcome.
    #[must_use]
    pub fn complement(self) -> Self {
        match self {
            Self::Loss => Self::Win,
            Self::Draw => Self::Draw,
            Self::Win => Self::Loss,
        }
    }
}

/// A rated entity's prior state. The entity may be a player or, for rated
/// puzzles, the puzzle itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub rating: i32,
    /// Rated matches completed before this one.
    pub played: u32,
}

impl RatingRecord {
    #[must_use]
    pub fn new(rating: i32, played: u32) -> Self {
        Self { rating, played }
    }

    /// State after one more rated match with the given delta.
    #[must_use]
    pub fn applied(self, delta: i32) -> Self {
        Self {
            rating: self.rating + delta,
            played: self.played + 1,
        }
    }
}

/// Probability of winning given both ratings, in `(0, 1)`.
#[must_use]
pub fn expected_score(player_rating: f64, opponent_rating: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_rating - player_rating) / ELO_VARIANCE))
}

/// Rating volatility after `played` rated matches.
#[must_use]
pub fn k_factor(played: u32) -> f64 {
    600.0 / (f64::from(played).powf(1.1) + 2.5) + K_FLOOR
}

/// Signed rating change for one side of a match.
///
/// Rounding is half-away-from-zero, so the two sides of an equal-`played`
/// match cancel exactly.
#[must_use]
pub fn rating_delta(player: RatingRecord, opponent_rating: i32, score: MatchScore) -> i32 {
    let expected = expected_score(f64::from(player.rating), f64::from(opponent_rating));
    round_delta(k_factor(player.played) * (score.value() - expected))
}

/// Deltas for both sides of one match, given the winner-side score.
#[must_use]
pub fn rating_delta_pair(
    player1: RatingRecord,
    player2: RatingRecord,
    score_player1: MatchScore,
) -> (i32, i32) {
    (
        rating_delta(player1, player2.rating, score_player1),
        rating_delta(player2, player1.rating, score_player1.complement()),
    )
}

// f64::round rounds half away from zero, which keeps the exchange
// antisymmetric: round(-x) == -round(x).
fn round_delta(raw: f64) -> i32 {
    raw.round() as i32
}

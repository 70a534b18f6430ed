//! Storage collaborator.
//!
//! Persistence sits behind [`MatchStore`] so the state machines never see
//! a database. Storage failures are retryable from the caller's point of
//! view and must never block or corrupt live play; the event-persistence
//! helper logs them and keeps going.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use tetrion_types::{MatchPoint, MatchResult, PlayerRole};

use crate::multiplayer::MultiplayerRoom;
use crate::room::RoomEvent;
use crate::solo::SoloGame;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Persistence seam for finished games, match points, results, and rating
/// changes.
pub trait MatchStore: Send + Sync {
    fn save_game(&self, user_id: &str, game_id: &str, score: u32) -> Result<(), StorageError>;
    fn save_match_point(&self, match_id: &str, point: &MatchPoint) -> Result<(), StorageError>;
    fn save_match_result(&self, result: &MatchResult) -> Result<(), StorageError>;
    fn apply_rating_delta(&self, user_id: &str, delta: i32) -> Result<(), StorageError>;
}

/// Persist the storage-relevant effects of one batch of room events.
///
/// Each finished point writes one game per player plus the point itself;
/// a match end writes the result and, for ranked play, both rating
/// deltas. Failures are logged and skipped so a flaky backend cannot
/// stall the room.
pub fn persist_room_events(store: &dyn MatchStore, room: &MultiplayerRoom, events: &[RoomEvent]) {
    let match_id = &room.result().match_id;
    for event in events {
        match event {
            RoomEvent::PointFinished { point } => {
                log_failure(store.save_game(
                    &room.seat(PlayerRole::Player1).user_id,
                    &point.game_id_player1,
                    point.score_player1,
                ));
                log_failure(store.save_game(
                    &room.seat(PlayerRole::Player2).user_id,
                    &point.game_id_player2,
                    point.score_player2,
                ));
                log_failure(store.save_match_point(match_id, point));
            }
            RoomEvent::MatchEnded { ratings, .. } => {
                log_failure(store.save_match_result(room.result()));
                if let Some(ratings) = ratings {
                    log_failure(store.apply_rating_delta(
                        &room.seat(PlayerRole::Player1).user_id,
                        ratings.delta_player1,
                    ));
                    log_failure(store.apply_rating_delta(
                        &room.seat(PlayerRole::Player2).user_id,
                        ratings.delta_player2,
                    ));
                }
            }
            _ => {}
        }
    }
}

/// Persist a finished solo game.
pub fn persist_solo_game(store: &dyn MatchStore, user_id: &str, game: &SoloGame) {
    log_failure(store.save_game(user_id, &game.game_id, game.score));
}

fn log_failure(result: Result<(), StorageError>) {
    if let Err(error) = result {
        warn!(%error, "storage write failed, will be retried by the next sync");
    }
}

/// In-memory store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    games: Vec<(String, String, u32)>,
    points: Vec<(String, MatchPoint)>,
    results: Vec<MatchResult>,
    ratings: HashMap<String, i32>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn games(&self) -> Vec<(String, String, u32)> {
        self.inner.lock().expect("store lock poisoned").games.clone()
    }

    #[must_use]
    pub fn points(&self) -> Vec<(String, MatchPoint)> {
        self.inner.lock().expect("store lock poisoned").points.clone()
    }

    #[must_use]
    pub fn results(&self) -> Vec<MatchResult> {
        self.inner.lock().expect("store lock poisoned").results.clone()
    }

    #[must_use]
    pub fn rating_of(&self, user_id: &str) -> i32 {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .ratings
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

impl MatchStore for MemoryStore {
    fn save_game(&self, user_id: &str, game_id: &str, score: u32) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .games
            .push((user_id.to_owned(), game_id.to_owned(), score));
        Ok(())
    }

    fn save_match_point(&self, match_id: &str, point: &MatchPoint) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .points
            .push((match_id.to_owned(), point.clone()));
        Ok(())
    }

    fn save_match_result(&self, result: &MatchResult) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .results
            .push(result.clone());
        Ok(())
    }

    fn apply_rating_delta(&self, user_id: &str, delta: i32) -> Result<(), StorageError> {
        *self
            .inner
            .lock()
            .expect("store lock poisoned")
            .ratings
            .entry(user_id.to_owned())
            .or_insert(0) += delta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplayer::{MatchConfig, MultiplayerRoom, PlayerSeat, COUNTDOWN_MS};
    use crate::rating::RatingRecord;

    fn ranked_room() -> MultiplayerRoom {
        let seat = |name: &str| PlayerSeat {
            user_id: name.to_owned(),
            rating: RatingRecord::new(1500, 10),
        };
        MultiplayerRoom::new(
            MatchConfig {
                is_ranked: true,
                winning_score: 1,
                ..MatchConfig::default()
            },
            seat("alice"),
            seat("bob"),
        )
    }

    #[test]
    fn one_point_writes_one_game_per_player_and_the_point() {
        let store = MemoryStore::new();
        let mut room = ranked_room();

        room.handle_ready(PlayerRole::Player1, 0).unwrap();
        room.handle_ready(PlayerRole::Player2, 0).unwrap();
        room.tick(COUNTDOWN_MS);
        let mut events = room.handle_topout(PlayerRole::Player1, 100, false).unwrap();
        events.extend(room.handle_topout(PlayerRole::Player2, 250, false).unwrap());

        persist_room_events(&store, &room, &events);

        let games = store.games();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].0, "alice");
        assert_eq!(games[0].2, 100);
        assert_eq!(games[1].0, "bob");
        assert_eq!(store.points().len(), 1);

        // winning_score 1: the match ended and ratings moved.
        assert_eq!(store.results().len(), 1);
        assert!(store.rating_of("bob") > 0);
        assert_eq!(store.rating_of("alice") + store.rating_of("bob"), 0);
    }

    #[test]
    fn a_failing_store_does_not_panic_persistence() {
        struct DownStore;
        impl MatchStore for DownStore {
            fn save_game(&self, _: &str, _: &str, _: u32) -> Result<(), StorageError> {
                Err(StorageError::Unavailable("connection refused".into()))
            }
            fn save_match_point(&self, _: &str, _: &MatchPoint) -> Result<(), StorageError> {
                Err(StorageError::Unavailable("connection refused".into()))
            }
            fn save_match_result(&self, _: &MatchResult) -> Result<(), StorageError> {
                Err(StorageError::Unavailable("connection refused".into()))
            }
            fn apply_rating_delta(&self, _: &str, _: i32) -> Result<(), StorageError> {
                Err(StorageError::Unavailable("connection refused".into()))
            }
        }

        let mut room = ranked_room();
        room.handle_ready(PlayerRole::Player1, 0).unwrap();
        room.handle_ready(PlayerRole::Player2, 0).unwrap();
        room.tick(COUNTDOWN_MS);
        let mut events = room.handle_topout(PlayerRole::Player1, 1, false).unwrap();
        events.extend(room.handle_topout(PlayerRole::Player2, 2, false).unwrap());

        persist_room_events(&DownStore, &room, &events);
    }
}

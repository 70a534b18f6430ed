//! Multiplayer room state machine.
//!
//! The room is a deterministic state machine driven entirely by explicit
//! inputs: client operations and [`MultiplayerRoom::tick`] with the current
//! wall clock. Timers are data, not callbacks. Every scheduled deadline
//! carries the room epoch at scheduling time, and the epoch is bumped on
//! every room-mode transition, so a timer wakeup that raced a state change
//! sees a stale epoch and does nothing.
//!
//! A match is a sequence of points. One point runs
//! `Waiting -> Countdown -> Playing` and settles when both players are
//! dead; the room then either loops back to `Waiting` or, when a side has
//! reached the winning score, locks at `MatchEnded`.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use tetrion_types::{
    get_match_score, get_match_winner, MatchPoint, MatchResult, MultiplayerPlayerMode,
    MultiplayerPlayerState, MultiplayerRoomMode, MultiplayerRoomState, PlayerRole, RoomKind,
};

use crate::rating::{rating_delta_pair, MatchScore, RatingRecord};
use crate::room::{MatchRatings, RoomError, RoomEvent, RoomId};

/// Default delay between both players readying and the point going live.
pub const COUNTDOWN_MS: u64 = 5_000;

/// Default time a disconnected in-game player may reconnect before being
/// topped out at their last known score.
pub const DISCONNECT_GRACE_MS: u64 = 10_000;

/// Match parameters fixed at room creation.
#[derive(Clone, Debug)]
pub struct MatchConfig {
    pub is_ranked: bool,
    /// Point tally a side must reach to win (first-to-N).
    pub winning_score: u32,
    pub valid_start_levels: Vec<u8>,
    pub countdown_ms: u64,
    pub disconnect_grace_ms: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            is_ranked: false,
            winning_score: 2,
            valid_start_levels: vec![9, 12, 15, 18, 19],
            countdown_ms: COUNTDOWN_MS,
            disconnect_grace_ms: DISCONNECT_GRACE_MS,
        }
    }
}

/// Identity and rating of one occupied player slot.
#[derive(Clone, Debug)]
pub struct PlayerSeat {
    pub user_id: String,
    pub rating: RatingRecord,
}

/// Read-only projection broadcast to clients after every validated
/// transition.
#[derive(Clone, Debug, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub kind: RoomKind,
    pub state: MultiplayerRoomState,
    pub match_score: (u32, u32),
    pub winning_score: u32,
    pub points_played: usize,
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    at_ms: u64,
    epoch: u64,
}

#[derive(Clone, Debug)]
struct PendingDeath {
    role: PlayerRole,
    game_id: String,
    score: u32,
}

/// One two-player match room.
#[derive(Debug)]
pub struct MultiplayerRoom {
    id: RoomId,
    state: MultiplayerRoomState,
    result: MatchResult,
    seats: [PlayerSeat; 2],
    /// Bumped on every room-mode transition; deadlines scheduled under an
    /// older epoch are dead on arrival.
    epoch: u64,
    countdown: Option<Deadline>,
    grace: [Option<Deadline>; 2],
    /// First death of the current point, held until the second settles it.
    pending_death: Option<PendingDeath>,
    /// Seed the current point's boards are dealt from.
    current_seed: String,
    countdown_ms: u64,
    disconnect_grace_ms: u64,
}

impl MultiplayerRoom {
    pub fn new(config: MatchConfig, player1: PlayerSeat, player2: PlayerSeat) -> Self {
        let seed = short_seed();
        let start_level = config
            .valid_start_levels
            .get(config.valid_start_levels.len() / 2)
            .copied()
            .unwrap_or(18);
        Self {
            id: RoomId::new(),
            state: MultiplayerRoomState {
                start_level,
                mode: MultiplayerRoomMode::Waiting,
                level_picker: PlayerRole::Player1,
                player1: MultiplayerPlayerState::default(),
                player2: MultiplayerPlayerState::default(),
            },
            result: MatchResult {
                match_id: Uuid::new_v4().to_string(),
                is_ranked: config.is_ranked,
                seed: seed.clone(),
                winning_score: config.winning_score,
                valid_start_levels: config.valid_start_levels,
                points: Vec::new(),
            },
            seats: [player1, player2],
            epoch: 0,
            countdown: None,
            grace: [None, None],
            pending_death: None,
            current_seed: seed,
            countdown_ms: config.countdown_ms,
            disconnect_grace_ms: config.disconnect_grace_ms,
        }
    }

    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> &MultiplayerRoomState {
        &self.state
    }

    #[must_use]
    pub fn result(&self) -> &MatchResult {
        &self.result
    }

    #[must_use]
    pub fn seat(&self, role: PlayerRole) -> &PlayerSeat {
        &self.seats[role.index() as usize]
    }

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id,
            kind: RoomKind::Multiplayer,
            state: self.state.clone(),
            match_score: get_match_score(&self.result),
            winning_score: self.result.winning_score,
            points_played: self.result.points.len(),
        }
    }

    /// A player signals readiness for the next point. When both players
    /// are ready the countdown is scheduled; [`MultiplayerRoom::tick`]
    /// fires it.
    pub fn handle_ready(&mut self, role: PlayerRole, now_ms: u64) -> OpResult {
        self.require_room_mode(MultiplayerRoomMode::Waiting, "Waiting")?;
        match self.state.player(role).mode {
            // Retransmitted ready is harmless.
            MultiplayerPlayerMode::Ready => return Ok(Vec::new()),
            MultiplayerPlayerMode::NotReady => {}
            mode => {
                return Err(RoomError::WrongPlayerMode {
                    role,
                    mode,
                    required: "NotReady",
                })
            }
        }
        self.state.player_mut(role).mode = MultiplayerPlayerMode::Ready;

        let mut events = vec![RoomEvent::StateChanged];
        if self.state.player(role.other()).mode == MultiplayerPlayerMode::Ready {
            self.set_room_mode(MultiplayerRoomMode::Countdown);
            let deadline_ms = now_ms + self.countdown_ms;
            self.countdown = Some(Deadline {
                at_ms: deadline_ms,
                epoch: self.epoch,
            });
            debug!(room = %self.id, deadline_ms, "countdown started");
            events.push(RoomEvent::CountdownStarted { deadline_ms });
        }
        Ok(events)
    }

    /// A player withdraws readiness; aborts a running countdown.
    pub fn handle_unready(&mut self, role: PlayerRole) -> OpResult {
        let mode = self.state.mode;
        if mode != MultiplayerRoomMode::Waiting && mode != MultiplayerRoomMode::Countdown {
            return Err(RoomError::WrongRoomMode {
                mode,
                required: "Waiting or Countdown",
            });
        }
        match self.state.player(role).mode {
            MultiplayerPlayerMode::NotReady => return Ok(Vec::new()),
            MultiplayerPlayerMode::Ready => {}
            player_mode => {
                return Err(RoomError::WrongPlayerMode {
                    role,
                    mode: player_mode,
                    required: "Ready",
                })
            }
        }
        self.state.player_mut(role).mode = MultiplayerPlayerMode::NotReady;

        let mut events = vec![RoomEvent::StateChanged];
        if mode == MultiplayerRoomMode::Countdown {
            self.set_room_mode(MultiplayerRoomMode::Waiting);
            self.countdown = None;
            debug!(room = %self.id, ?role, "countdown aborted");
            events.push(RoomEvent::CountdownAborted);
        }
        Ok(events)
    }

    /// The current level picker chooses the starting level for the next
    /// point and passes the pick to the other player.
    pub fn select_level(&mut self, role: PlayerRole, level: u8) -> OpResult {
        self.require_room_mode(MultiplayerRoomMode::Waiting, "Waiting")?;
        if self.state.level_picker != role {
            return Err(RoomError::NotLevelPicker { role });
        }
        let player_mode = self.state.player(role).mode;
        if player_mode != MultiplayerPlayerMode::NotReady {
            return Err(RoomError::WrongPlayerMode {
                role,
                mode: player_mode,
                required: "NotReady",
            });
        }
        if !self.result.valid_start_levels.contains(&level) {
            return Err(RoomError::InvalidStartLevel { level });
        }
        self.state.start_level = level;
        self.state.level_picker = role.other();
        Ok(vec![RoomEvent::StateChanged])
    }

    /// Live score while in game; this is the score a grace-expiry death is
    /// finalized at.
    pub fn update_score(&mut self, role: PlayerRole, score: u32) -> OpResult {
        self.require_room_mode(MultiplayerRoomMode::Playing, "Playing")?;
        self.require_player_mode(role, MultiplayerPlayerMode::InGame, "InGame")?;
        self.state.player_mut(role).score = score;
        Ok(vec![RoomEvent::StateChanged])
    }

    /// A player's game is over, by topout or forfeit. The first death of a
    /// point is held pending; the second settles the point.
    pub fn handle_topout(&mut self, role: PlayerRole, score: u32, forfeit: bool) -> OpResult {
        self.require_room_mode(MultiplayerRoomMode::Playing, "Playing")?;
        self.require_player_mode(role, MultiplayerPlayerMode::InGame, "InGame")?;
        debug!(room = %self.id, ?role, score, forfeit, "player died");
        Ok(self.settle_death(role, score))
    }

    /// A player's connection dropped. Outside of live play they simply
    /// fall back to not-ready; mid-game they get a grace deadline.
    pub fn handle_disconnect(&mut self, role: PlayerRole, now_ms: u64) -> OpResult {
        match self.state.mode {
            MultiplayerRoomMode::Waiting | MultiplayerRoomMode::Countdown => {
                let aborted = self.state.mode == MultiplayerRoomMode::Countdown;
                self.state.player_mut(role).mode = MultiplayerPlayerMode::NotReady;
                let mut events = vec![RoomEvent::StateChanged];
                if aborted {
                    self.set_room_mode(MultiplayerRoomMode::Waiting);
                    self.countdown = None;
                    events.push(RoomEvent::CountdownAborted);
                }
                Ok(events)
            }
            MultiplayerRoomMode::Playing => {
                if self.state.player(role).mode != MultiplayerPlayerMode::InGame {
                    return Ok(Vec::new());
                }
                let deadline_ms = now_ms + self.disconnect_grace_ms;
                self.grace[role.index() as usize] = Some(Deadline {
                    at_ms: deadline_ms,
                    epoch: self.epoch,
                });
                debug!(room = %self.id, ?role, deadline_ms, "disconnect grace started");
                Ok(vec![RoomEvent::GraceStarted { role, deadline_ms }])
            }
            MultiplayerRoomMode::MatchEnded => Ok(Vec::new()),
        }
    }

    /// A disconnected player came back; any pending grace deadline for
    /// them is cancelled.
    pub fn handle_reconnect(&mut self, role: PlayerRole) -> OpResult {
        if self.grace[role.index() as usize].take().is_some() {
            debug!(room = %self.id, ?role, "reconnected within grace");
        }
        // Reconnecting clients always need a fresh snapshot.
        Ok(vec![RoomEvent::StateChanged])
    }

    /// Apply every due deadline. Callers may tick as often as they like;
    /// stale or premature deadlines are no-ops.
    pub fn tick(&mut self, now_ms: u64) -> Vec<RoomEvent> {
        let mut events = Vec::new();

        if let Some(deadline) = self.countdown {
            if deadline.epoch != self.epoch || self.state.mode != MultiplayerRoomMode::Countdown {
                self.countdown = None;
            } else if now_ms >= deadline.at_ms {
                self.countdown = None;
                self.start_point();
                events.push(RoomEvent::StateChanged);
                events.push(RoomEvent::PointStarted);
            }
        }

        for role in [PlayerRole::Player1, PlayerRole::Player2] {
            let slot = role.index() as usize;
            let Some(deadline) = self.grace[slot] else {
                continue;
            };
            let live = deadline.epoch == self.epoch
                && self.state.mode == MultiplayerRoomMode::Playing
                && self.state.player(role).mode == MultiplayerPlayerMode::InGame;
            if !live {
                self.grace[slot] = None;
            } else if now_ms >= deadline.at_ms {
                self.grace[slot] = None;
                let score = self.state.player(role).score;
                debug!(room = %self.id, ?role, score, "grace expired, forcing topout");
                events.push(RoomEvent::PlayerForcedDead { role });
                events.extend(self.settle_death(role, score));
            }
        }

        events
    }

    /// Countdown expiry: everyone goes in game, whatever their mode. A
    /// player who lost their connection during the countdown still starts
    /// the point and is handled by the disconnect path.
    fn start_point(&mut self) {
        self.set_room_mode(MultiplayerRoomMode::Playing);
        self.current_seed = short_seed();
        for role in [PlayerRole::Player1, PlayerRole::Player2] {
            let player = self.state.player_mut(role);
            player.mode = MultiplayerPlayerMode::InGame;
            player.score = 0;
        }
        debug!(room = %self.id, seed = %self.current_seed, "point started");
    }

    fn settle_death(&mut self, role: PlayerRole, score: u32) -> Vec<RoomEvent> {
        let player = self.state.player_mut(role);
        player.mode = MultiplayerPlayerMode::Dead;
        player.score = score;
        self.grace[role.index() as usize] = None;

        let game_id = Uuid::new_v4().to_string();
        let mut events = vec![RoomEvent::StateChanged];

        let Some(first) = self.pending_death.take() else {
            self.pending_death = Some(PendingDeath {
                role,
                game_id,
                score,
            });
            return events;
        };

        // Second death of the point: settle it.
        let (p1, p2) = match first.role {
            PlayerRole::Player1 => (first, PendingDeath { role, game_id, score }),
            PlayerRole::Player2 => (PendingDeath { role, game_id, score }, first),
        };
        let point = MatchPoint {
            seed: self.current_seed.clone(),
            game_id_player1: p1.game_id,
            score_player1: p1.score,
            game_id_player2: p2.game_id,
            score_player2: p2.score,
        };
        self.result.points.push(point.clone());
        events.push(RoomEvent::PointFinished { point });

        if let Some(winner) = get_match_winner(&self.result) {
            self.set_room_mode(MultiplayerRoomMode::MatchEnded);
            let ratings = self.result.is_ranked.then(|| self.settle_ratings(winner));
            debug!(room = %self.id, ?winner, "match ended");
            events.push(RoomEvent::MatchEnded { winner, ratings });
        } else {
            // Next point of the match. The pick alternates even when the
            // previous picker never exercised it.
            self.set_room_mode(MultiplayerRoomMode::Waiting);
            self.state.level_picker = self.state.level_picker.other();
            self.state.player1 = MultiplayerPlayerState::default();
            self.state.player2 = MultiplayerPlayerState::default();
        }
        events
    }

    fn settle_ratings(&mut self, winner: PlayerRole) -> MatchRatings {
        let score_player1 = match winner {
            PlayerRole::Player1 => MatchScore::Win,
            PlayerRole::Player2 => MatchScore::Loss,
        };
        let before1 = self.seats[0].rating;
        let before2 = self.seats[1].rating;
        let (delta_player1, delta_player2) = rating_delta_pair(before1, before2, score_player1);
        self.seats[0].rating = before1.applied(delta_player1);
        self.seats[1].rating = before2.applied(delta_player2);
        MatchRatings {
            player1: before1,
            delta_player1,
            player2: before2,
            delta_player2,
        }
    }

    fn set_room_mode(&mut self, mode: MultiplayerRoomMode) {
        self.state.mode = mode;
        self.epoch += 1;
    }

    fn require_room_mode(
        &self,
        required_mode: MultiplayerRoomMode,
        required: &'static str,
    ) -> Result<(), RoomError> {
        if self.state.mode == required_mode {
            Ok(())
        } else {
            Err(RoomError::WrongRoomMode {
                mode: self.state.mode,
                required,
            })
        }
    }

    fn require_player_mode(
        &self,
        role: PlayerRole,
        required_mode: MultiplayerPlayerMode,
        required: &'static str,
    ) -> Result<(), RoomError> {
        let mode = self.state.player(role).mode;
        if mode == required_mode {
            Ok(())
        } else {
            Err(RoomError::WrongPlayerMode {
                role,
                mode,
                required,
            })
        }
    }
}

type OpResult = Result<Vec<RoomEvent>, RoomError>;

fn short_seed() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

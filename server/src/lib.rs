//! WebSocket game server.
//!
//! All game semantics live in `tetrion-engine`; this crate is transport
//! and scheduling. Each room is an independent failure unit: its state
//! machine sits behind one async mutex, every mutation (client packet,
//! disconnect, timer wakeup) happens under that lock, and the resulting
//! events are turned into broadcasts, persistence writes, and timer
//! spawns before the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tetrion_engine::{
    persist_room_events, MatchConfig, MatchStore, MultiplayerRoom, PlayerSeat, RatingRecord,
    RoomEvent, RoomId, RoomSnapshot,
};
use tetrion_types::packet::MatchPointResult;
use tetrion_types::{
    MatchPoint, MultiplayerRoomMode, Packet, PacketAssembler, PlayerRole, MAX_PLAYERS_IN_ROOM,
    SERVER_INDEX,
};

pub mod api;
pub mod board_capture;
pub mod timers;

pub use api::Api;

/// Rating every account starts from.
const INITIAL_RATING: i32 = 1500;

/// Outbound frames queued per connection before the writer falls behind
/// and the connection is considered stuck.
pub const WS_OUTBOUND_CAPACITY: usize = 64;

/// Server-wide settings, fixed at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub winning_score: u32,
    pub valid_start_levels: Vec<u8>,
    pub countdown_ms: u64,
    pub disconnect_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = MatchConfig::default();
        Self {
            winning_score: defaults.winning_score,
            valid_start_levels: defaults.valid_start_levels,
            countdown_ms: defaults.countdown_ms,
            disconnect_grace_ms: defaults.disconnect_grace_ms,
        }
    }
}

/// Messages pushed to clients on the text side of the socket. Binary
/// frames carry the packet stream; text frames carry room bookkeeping.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage<'a> {
    /// Fresh room snapshot after a validated transition.
    Snapshot { snapshot: &'a RoomSnapshot },
    /// A point goes live when this deadline passes.
    Countdown { deadline_ms: u64 },
    /// Sent once when a match connection is paired into a room.
    Assigned { room_id: String, player_index: u8 },
    /// Settled rated puzzle attempt.
    PuzzleResult {
        solved: bool,
        delta_player: i32,
        delta_puzzle: i32,
    },
}

impl ServerMessage<'_> {
    /// Serialize into a websocket text frame.
    #[must_use]
    pub fn to_message(&self) -> Message {
        // Serialization of these variants cannot fail.
        Message::Text(serde_json::to_string(self).unwrap_or_default())
    }
}

/// One live match room plus the outbound queues of its connections.
pub struct MatchRoomHandle {
    pub id: RoomId,
    pub room: Mutex<MultiplayerRoom>,
    outbound: StdMutex<[Option<mpsc::Sender<Message>>; MAX_PLAYERS_IN_ROOM]>,
}

impl MatchRoomHandle {
    fn new(room: MultiplayerRoom) -> Self {
        Self {
            id: room.id(),
            room: Mutex::new(room),
            outbound: StdMutex::new([None, None]),
        }
    }

    /// Attach a connection's outbound queue to a player slot.
    pub fn attach(&self, role: PlayerRole, sender: mpsc::Sender<Message>) {
        self.outbound.lock().expect("outbound lock poisoned")[role.index() as usize] =
            Some(sender);
    }

    pub fn detach(&self, role: PlayerRole) {
        self.outbound.lock().expect("outbound lock poisoned")[role.index() as usize] = None;
    }

    /// True while at least one connection is attached to the room.
    #[must_use]
    pub fn has_attached(&self) -> bool {
        self.outbound
            .lock()
            .expect("outbound lock poisoned")
            .iter()
            .any(Option::is_some)
    }

    /// Queue a frame for one player. A full queue means the writer task is
    /// stuck or the client stopped reading; the frame is dropped and the
    /// writer's own timeout handles teardown.
    pub fn send_to(&self, role: PlayerRole, message: Message) {
        let outbound = self.outbound.lock().expect("outbound lock poisoned");
        if let Some(sender) = &outbound[role.index() as usize] {
            if let Err(error) = sender.try_send(message) {
                warn!(room = %self.id, ?role, %error, "dropping outbound frame");
            }
        }
    }

    pub fn send_to_both(&self, message: Message) {
        self.send_to(PlayerRole::Player1, message.clone());
        self.send_to(PlayerRole::Player2, message);
    }
}

struct PendingOpponent {
    user_id: String,
    ranked: bool,
    reply: oneshot::Sender<Arc<MatchRoomHandle>>,
}

/// Outcome of joining the matchmaking queue.
pub enum MatchSlot {
    /// First in line; the receiver resolves when an opponent arrives.
    Waiting(oneshot::Receiver<Arc<MatchRoomHandle>>),
    /// Paired against a waiting player; the room already exists.
    Paired(Arc<MatchRoomHandle>),
}

/// Shared server state behind every connection handler.
pub struct Server {
    pub config: ServerConfig,
    store: Arc<dyn MatchStore>,
    started: Instant,
    /// In-process rating profiles, keyed by user id.
    profiles: StdMutex<HashMap<String, RatingRecord>>,
    puzzle_ratings: StdMutex<HashMap<String, RatingRecord>>,
    rooms: StdMutex<HashMap<RoomId, Arc<MatchRoomHandle>>>,
    pending_match: Mutex<Option<PendingOpponent>>,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<dyn MatchStore>) -> Self {
        Self {
            config,
            store,
            started: Instant::now(),
            profiles: StdMutex::new(HashMap::new()),
            puzzle_ratings: StdMutex::new(HashMap::new()),
            rooms: StdMutex::new(HashMap::new()),
            pending_match: Mutex::new(None),
        }
    }

    /// Monotonic server clock, the `now_ms` fed to every room operation.
    /// Runs on tokio time, so paused-clock tests control it.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn store(&self) -> &dyn MatchStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn rating_of(&self, user_id: &str) -> RatingRecord {
        *self
            .profiles
            .lock()
            .expect("profiles lock poisoned")
            .entry(user_id.to_owned())
            .or_insert_with(|| RatingRecord::new(INITIAL_RATING, 0))
    }

    #[must_use]
    pub fn puzzle_rating_of(&self, puzzle_id: &str) -> RatingRecord {
        *self
            .puzzle_ratings
            .lock()
            .expect("puzzle ratings lock poisoned")
            .entry(puzzle_id.to_owned())
            .or_insert_with(|| RatingRecord::new(INITIAL_RATING, 0))
    }

    pub fn set_rating(&self, user_id: &str, record: RatingRecord) {
        self.profiles
            .lock()
            .expect("profiles lock poisoned")
            .insert(user_id.to_owned(), record);
    }

    pub fn set_puzzle_rating(&self, puzzle_id: &str, record: RatingRecord) {
        self.puzzle_ratings
            .lock()
            .expect("puzzle ratings lock poisoned")
            .insert(puzzle_id.to_owned(), record);
    }

    #[must_use]
    pub fn room(&self, id: RoomId) -> Option<Arc<MatchRoomHandle>> {
        self.rooms.lock().expect("rooms lock poisoned").get(&id).cloned()
    }

    pub fn remove_room(&self, id: RoomId) {
        if self
            .rooms
            .lock()
            .expect("rooms lock poisoned")
            .remove(&id)
            .is_some()
        {
            info!(room = %id, "room removed");
        }
    }

    fn match_config(&self, ranked: bool) -> MatchConfig {
        MatchConfig {
            is_ranked: ranked,
            winning_score: self.config.winning_score,
            valid_start_levels: self.config.valid_start_levels.clone(),
            countdown_ms: self.config.countdown_ms,
            disconnect_grace_ms: self.config.disconnect_grace_ms,
        }
    }

    /// Enter the matchmaking queue. The first caller parks; the second is
    /// paired against them and the room is created and registered here.
    pub async fn join_match_queue(&self, user_id: &str, ranked: bool) -> MatchSlot {
        let mut pending = self.pending_match.lock().await;
        match pending.take() {
            Some(opponent) => {
                let config = self.match_config(opponent.ranked || ranked);
                let room = MultiplayerRoom::new(
                    config,
                    PlayerSeat {
                        user_id: opponent.user_id.clone(),
                        rating: self.rating_of(&opponent.user_id),
                    },
                    PlayerSeat {
                        user_id: user_id.to_owned(),
                        rating: self.rating_of(user_id),
                    },
                );
                info!(room = %room.id(), player1 = %opponent.user_id, player2 = %user_id, "match created");
                let handle = Arc::new(MatchRoomHandle::new(room));
                self.rooms
                    .lock()
                    .expect("rooms lock poisoned")
                    .insert(handle.id, handle.clone());
                if opponent.reply.send(handle.clone()).is_err() {
                    // The waiting player gave up just before pairing; the
                    // joiner keeps the room and waits for a reconnect that
                    // will never come, then idles out with the room.
                    warn!(room = %handle.id, "queued opponent left before pairing");
                }
                MatchSlot::Paired(handle)
            }
            None => {
                let (reply, slot) = oneshot::channel();
                *pending = Some(PendingOpponent {
                    user_id: user_id.to_owned(),
                    ranked,
                    reply,
                });
                debug!(user = %user_id, "waiting for an opponent");
                MatchSlot::Waiting(slot)
            }
        }
    }

    /// Drop a queued player that disconnected before being paired.
    pub async fn leave_match_queue(&self, user_id: &str) {
        let mut pending = self.pending_match.lock().await;
        if pending.as_ref().is_some_and(|p| p.user_id == user_id) {
            *pending = None;
        }
    }
}

/// Apply the side effects of one batch of room events, under the room
/// lock: persistence, snapshot broadcast, timer scheduling, and profile
/// write-back.
pub fn process_room_events(
    server: &Arc<Server>,
    handle: &Arc<MatchRoomHandle>,
    room: &MultiplayerRoom,
    events: &[RoomEvent],
) {
    persist_room_events(server.store(), room, events);

    let snapshot = room.snapshot();
    let mut broadcast_snapshot = false;
    for event in events {
        match event {
            RoomEvent::StateChanged
            | RoomEvent::PointStarted
            | RoomEvent::CountdownAborted
            | RoomEvent::PlayerForcedDead { .. } => broadcast_snapshot = true,
            RoomEvent::PointFinished { point } => {
                broadcast_snapshot = true;
                broadcast_point_result(handle, &snapshot, point);
            }
            RoomEvent::CountdownStarted { deadline_ms } => {
                handle.send_to_both(
                    ServerMessage::Countdown {
                        deadline_ms: *deadline_ms,
                    }
                    .to_message(),
                );
                timers::schedule_tick(server.clone(), handle.clone(), *deadline_ms);
            }
            RoomEvent::GraceStarted { deadline_ms, .. } => {
                timers::schedule_tick(server.clone(), handle.clone(), *deadline_ms);
            }
            RoomEvent::MatchEnded { winner, ratings } => {
                broadcast_snapshot = true;
                info!(room = %handle.id, ?winner, "match finished");
                if ratings.is_some() {
                    for role in [PlayerRole::Player1, PlayerRole::Player2] {
                        let seat = room.seat(role);
                        server.set_rating(&seat.user_id, seat.rating);
                    }
                }
            }
        }
    }
    if broadcast_snapshot {
        handle.send_to_both(
            ServerMessage::Snapshot {
                snapshot: &snapshot,
            }
            .to_message(),
        );
    }
}

/// Drop the registry entry once nothing can bring the room back: no
/// connection is attached and no live point is pending. A fully detached
/// room that is still `Playing` stays registered, because its grace
/// timers have yet to settle the point; their wakeups re-run this check.
pub fn remove_room_if_abandoned(
    server: &Server,
    handle: &MatchRoomHandle,
    room: &MultiplayerRoom,
) {
    if handle.has_attached() || room.state().mode == MultiplayerRoomMode::Playing {
        return;
    }
    server.remove_room(handle.id);
}

/// Settled points are also pushed on the binary channel, inline with the
/// relayed game streams, so recorders see them in stream order.
fn broadcast_point_result(handle: &MatchRoomHandle, snapshot: &RoomSnapshot, point: &MatchPoint) {
    let packet = Packet::MatchPointResult(MatchPointResult {
        // The wire index is 4 bits; a tie-heavy match running past 16
        // points saturates rather than failing to encode.
        point_index: snapshot.points_played.saturating_sub(1).min(15) as u8,
        score_player1: point.score_player1,
        score_player2: point.score_player2,
    });
    let mut assembler = PacketAssembler::new();
    if let Err(error) = assembler.add_packet(&packet) {
        warn!(room = %handle.id, %error, "failed to encode point result");
        return;
    }
    match assembler.encode(Some(SERVER_INDEX)) {
        Ok(frame) => handle.send_to_both(Message::Binary(frame)),
        Err(error) => warn!(room = %handle.id, %error, "failed to frame point result"),
    }
}

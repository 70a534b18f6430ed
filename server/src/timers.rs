//! Deadline wakeups for room timers.
//!
//! A timer here is just a spawned sleep that calls `tick` under the room
//! lock when it elapses. All correctness lives in the engine's epoch
//! check: a wakeup whose deadline was aborted or superseded ticks a room
//! that no longer has that deadline scheduled, and nothing happens. Timers
//! are therefore never cancelled, only outlived.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::{process_room_events, remove_room_if_abandoned, MatchRoomHandle, Server};

/// Spawn a wakeup that ticks the room once `deadline_ms` (server clock)
/// has passed.
pub fn schedule_tick(server: Arc<Server>, handle: Arc<MatchRoomHandle>, deadline_ms: u64) {
    tokio::spawn(async move {
        let wait = deadline_ms.saturating_sub(server.now_ms());
        tokio::time::sleep(Duration::from_millis(wait)).await;

        let mut room = handle.room.lock().await;
        let events = room.tick(server.now_ms());
        if events.is_empty() {
            debug!(room = %handle.id, deadline_ms, "stale timer wakeup");
        } else {
            process_room_events(&server, &handle, &room, &events);
            // A grace expiry may have settled the point with every socket
            // already gone; the room must not outlive its last connection.
            remove_room_if_abandoned(&server, &handle, &room);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MatchSlot, ServerConfig};
    use std::sync::Arc;
    use tetrion_engine::MemoryStore;
    use tetrion_types::{MultiplayerRoomMode, PlayerRole};

    async fn paired_room(server: &Arc<Server>) -> Arc<MatchRoomHandle> {
        let MatchSlot::Waiting(_slot) = server.join_match_queue("alice", false).await else {
            panic!("first entry should wait");
        };
        let MatchSlot::Paired(handle) = server.join_match_queue("bob", false).await else {
            panic!("second entry should pair");
        };
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_timer_starts_the_point() {
        let server = Arc::new(Server::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let handle = paired_room(&server).await;

        {
            let mut room = handle.room.lock().await;
            let now = server.now_ms();
            room.handle_ready(PlayerRole::Player1, now).unwrap();
            let events = room.handle_ready(PlayerRole::Player2, now).unwrap();
            process_room_events(&server, &handle, &room, &events);
        }

        // Paused clock: sleeping past the deadline runs the timer task.
        tokio::time::sleep(Duration::from_millis(server.config.countdown_ms + 100)).await;

        let room = handle.room.lock().await;
        assert_eq!(room.state().mode, MultiplayerRoomMode::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_countdown_timer_is_a_no_op() {
        let server = Arc::new(Server::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let handle = paired_room(&server).await;

        {
            let mut room = handle.room.lock().await;
            let now = server.now_ms();
            room.handle_ready(PlayerRole::Player1, now).unwrap();
            let events = room.handle_ready(PlayerRole::Player2, now).unwrap();
            process_room_events(&server, &handle, &room, &events);
            room.handle_unready(PlayerRole::Player1).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(server.config.countdown_ms + 100)).await;

        let room = handle.room.lock().await;
        assert_eq!(room.state().mode, MultiplayerRoomMode::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_settles_and_drops_a_fully_disconnected_room() {
        let server = Arc::new(Server::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let handle = paired_room(&server).await;

        {
            let mut room = handle.room.lock().await;
            let now = server.now_ms();
            room.handle_ready(PlayerRole::Player1, now).unwrap();
            room.handle_ready(PlayerRole::Player2, now).unwrap();
            room.tick(now + server.config.countdown_ms);
            assert_eq!(room.state().mode, MultiplayerRoomMode::Playing);

            // One player dies, the other vanishes; both sockets are gone,
            // so only the grace timer can finish the point.
            room.handle_topout(PlayerRole::Player1, 100, false).unwrap();
            let events = room
                .handle_disconnect(PlayerRole::Player2, server.now_ms())
                .unwrap();
            process_room_events(&server, &handle, &room, &events);
        }

        tokio::time::sleep(Duration::from_millis(
            server.config.countdown_ms + server.config.disconnect_grace_ms + 100,
        ))
        .await;

        assert!(server.room(handle.id).is_none());
    }
}

//! Solo room: a single player streaming their own game.
//!
//! The server's only jobs here are tracking the in-progress game from the
//! packet stream and handing back a finished game for persistence. Scores
//! arrive through periodic recovery packets, so a game that ends with a
//! plain `GameEnd` is finalized at the last recovered score.

use tracing::debug;
use uuid::Uuid;

use tetrion_types::Packet;

use crate::room::RoomId;

/// A finished (or in-progress) solo game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoloGame {
    pub game_id: String,
    pub start_level: u8,
    pub score: u32,
    pub level: u8,
    pub lines: u16,
}

/// Room hosting one player's solo sessions, one game at a time.
#[derive(Debug)]
pub struct SoloRoom {
    id: RoomId,
    user_id: String,
    current: Option<SoloGame>,
}

impl SoloRoom {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            id: RoomId::new(),
            user_id: user_id.into(),
            current: None,
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
    pub fn is_in_game(&self) -> bool {
        self.current.is_some()
    }

    /// Advance the room with one packet from the player's stream.
    ///
    /// Returns a finished game when this packet ended one. A `GameStart`
    /// while another game is still open finalizes the old game first (the
    /// client restarted without a clean end).
    pub fn on_packet(&mut self, packet: &Packet) -> Option<SoloGame> {
        match packet {
            Packet::GameStart(start) => {
                let abandoned = self.current.take();
                self.current = Some(SoloGame {
                    game_id: Uuid::new_v4().to_string(),
                    start_level: start.level,
                    score: 0,
                    level: start.level,
                    lines: 0,
                });
                debug!(room = %self.id, user = %self.user_id, level = start.level, "solo game started");
                abandoned
            }
            Packet::GameRecovery(recovery) => {
                // Recovery doubles as game creation after a server restart.
                let game = self.current.get_or_insert_with(|| SoloGame {
                    game_id: Uuid::new_v4().to_string(),
                    start_level: recovery.start_level,
                    score: 0,
                    level: recovery.start_level,
                    lines: 0,
                });
                game.score = recovery.score;
                game.level = recovery.level;
                game.lines = recovery.lines;
                None
            }
            Packet::Topout(topout) => {
                let mut game = self.current.take()?;
                game.score = topout.score;
                debug!(room = %self.id, score = game.score, "solo game topped out");
                Some(game)
            }
            Packet::GameEnd => self.current.take(),
            _ => None,
        }
    }

    /// Disconnect finalizes any open game at its last recovered score.
    pub fn on_disconnect(&mut self) -> Option<SoloGame> {
        self.current.take()
    }
}

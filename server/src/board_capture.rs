//! Glue between an external board source and the packet stream.
//!
//! Boards arrive from outside the core (an OCR capture of a console feed,
//! or an emulator tap); this module only wraps them into stream packets.
//! A frame whose settled board is unchanged ships as the cheap
//! abbreviated packet (just the active piece pose); anything else ships
//! the full board.

use tetrion_types::packet::{GameAbbrBoard, GameFullBoard, DELTA_MS_BITS};
use tetrion_types::{Board, Packet, PiecePose};

/// Largest encodable frame delta; longer gaps saturate.
const MAX_DELTA_MS: u64 = (1 << DELTA_MS_BITS) - 1;

/// Per-player capture session deciding full versus abbreviated board
/// packets.
#[derive(Debug, Default)]
pub struct BoardCapture {
    last_board: Option<Board>,
    last_frame_ms: Option<u64>,
}

impl BoardCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap one captured frame into a packet.
    ///
    /// `pose` is the active piece when the source could isolate it; without
    /// one the full board is sent regardless.
    pub fn capture(&mut self, now_ms: u64, board: Board, pose: Option<PiecePose>) -> Packet {
        let delta_ms = self
            .last_frame_ms
            .map_or(0, |last| now_ms.saturating_sub(last).min(MAX_DELTA_MS))
            as u16;
        self.last_frame_ms = Some(now_ms);

        let unchanged = self.last_board.as_ref() == Some(&board);
        if let (true, Some(pose)) = (unchanged, pose) {
            return Packet::GameAbbrBoard(GameAbbrBoard { delta_ms, pose });
        }
        self.last_board = Some(board.clone());
        Packet::GameFullBoard(GameFullBoard { delta_ms, board })
    }
}

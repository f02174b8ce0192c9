//! Sliding priority window.
//!
//! One cursor marks the head of the download window. A `jump` re-anchors the
//! cursor at the first missing piece at or after the target, raises a hot
//! window of missing pieces to high priority, and keeps the rest of the
//! requested range fetching at low priority. Every finished piece advances
//! the window, so sequential readers drag a small high-priority region
//! through the torrent.

use tracing::trace;

use crate::engine::TorrentEngine;
use crate::torrent::{PiecePriority, TorrentLayout};

/// Piece-priority steering state. All methods run under the reactor lock.
#[derive(Debug)]
pub struct PieceWindow {
    cursor: u32,
    num_pieces: u32,
    piece_length: u32,
    head_bytes: u64,
}

impl PieceWindow {
    pub fn new(layout: &TorrentLayout, head_bytes: u64) -> Self {
        Self {
            cursor: 0,
            num_pieces: layout.num_pieces(),
            piece_length: layout.piece_length(),
            head_bytes,
        }
    }

    /// Piece index at the head of the window.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// First piece at or after `from` the engine does not have yet.
    fn next_missing(&self, engine: &dyn TorrentEngine, from: u32) -> Option<u32> {
        (from..self.num_pieces).find(|&piece| !engine.have_piece(piece))
    }

    /// Re-anchors the window at `piece` to serve a read of `hint_size` bytes.
    ///
    /// Raises missing pieces from the new cursor to high priority until
    /// `head_bytes` worth of missing piece-bytes are hot, then marks the
    /// remainder of the requested range low priority so it is at least being
    /// fetched. Pieces already present are never reprioritized, and a target
    /// past the last missing piece changes nothing.
    pub fn jump(&mut self, engine: &dyn TorrentEngine, piece: u32, hint_size: u64) {
        let Some(mut tail) = self.next_missing(engine, piece) else {
            return;
        };
        self.cursor = tail;
        trace!(cursor = tail, hint_size, "window moved");

        let piece_length = u64::from(self.piece_length);
        let mut hot = 0u64;
        while hot < self.head_bytes {
            let Some(next) = self.next_missing(engine, tail) else {
                return;
            };
            engine.piece_priority(next, PiecePriority::High);
            tail = next + 1;
            hot += piece_length;
        }

        let mut covered = u64::from(tail - piece) * piece_length;
        while covered < hint_size + piece_length - 1 && tail < self.num_pieces {
            if !engine.have_piece(tail) {
                engine.piece_priority(tail, PiecePriority::Low);
            }
            tail += 1;
            covered += piece_length;
        }
    }

    /// Slides the window past freshly finished pieces; called on every
    /// piece-finished alert.
    pub fn advance(&mut self, engine: &dyn TorrentEngine) {
        self.jump(engine, self.cursor, 0);
    }
}

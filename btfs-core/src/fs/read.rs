//! Decomposition of one VFS read into piece-level parts.

use tracing::warn;

use crate::engine::TorrentEngine;
use crate::torrent::TorrentLayout;

/// One contiguous region of a piece, destined for a slice of the read's
/// output buffer. Each destination byte is written exactly once: `filled`
/// flips from false to true the first time the piece payload arrives.
#[derive(Debug, Clone, Copy)]
pub struct PiecePart {
    pub piece: u32,
    pub start: u32,
    pub length: u32,
    buf_offset: usize,
    filled: bool,
}

/// One in-flight VFS read.
///
/// Owns its output buffer for its whole lifetime; the parts cover
/// `[offset, offset + clamped_size)` of the file contiguously and without
/// overlap.
#[derive(Debug)]
pub struct ReadRequest {
    parts: Vec<PiecePart>,
    buf: Vec<u8>,
}

impl ReadRequest {
    /// Builds a read of `requested` bytes at `offset` into the given file.
    ///
    /// The size is clamped so it never runs past the end of the file; a
    /// request entirely past the end yields an empty read.
    pub fn new(layout: &TorrentLayout, file_index: usize, offset: u64, requested: u64) -> Self {
        let file_size = layout.file_size(file_index);
        let clamped = requested.min(file_size.saturating_sub(offset.min(file_size)));

        let mut parts = Vec::new();
        let mut file_offset = offset;
        let mut remaining = clamped;
        let mut buf_offset = 0usize;
        while remaining > 0 {
            let Some(region) = layout.map_file(file_index, file_offset, remaining) else {
                break;
            };
            parts.push(PiecePart {
                piece: region.piece,
                start: region.start,
                length: region.length,
                buf_offset,
                filled: false,
            });
            file_offset += u64::from(region.length);
            remaining -= u64::from(region.length);
            buf_offset += region.length as usize;
        }

        Self {
            parts,
            buf: vec![0u8; buf_offset],
        }
    }

    /// Asks the engine to deliver every part's piece that it already has.
    /// Idempotent: duplicate deliveries are absorbed by the `filled` guard
    /// in [`copy`](Self::copy).
    pub fn trigger(&self, engine: &dyn TorrentEngine) {
        for part in &self.parts {
            if engine.have_piece(part.piece) {
                engine.read_piece(part.piece);
            }
        }
    }

    /// Copies `buffer` (one whole piece) into every unfilled part of that
    /// piece.
    pub fn copy(&mut self, piece: u32, buffer: &[u8]) {
        for part in &mut self.parts {
            if part.piece != piece || part.filled {
                continue;
            }
            let start = part.start as usize;
            let end = start + part.length as usize;
            let Some(source) = buffer.get(start..end) else {
                warn!(
                    piece,
                    have = buffer.len(),
                    need = end,
                    "short piece buffer ignored"
                );
                continue;
            };
            self.buf[part.buf_offset..part.buf_offset + part.length as usize]
                .copy_from_slice(source);
            part.filled = true;
        }
    }

    /// True once every part has been filled.
    pub fn finished(&self) -> bool {
        self.parts.iter().all(|part| part.filled)
    }

    /// Number of bytes this read will return.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True for reads clamped to nothing.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Piece the read begins in, if any.
    pub fn first_piece(&self) -> Option<u32> {
        self.parts.first().map(|part| part.piece)
    }

    /// The parts, in file order.
    pub fn parts(&self) -> &[PiecePart] {
        &self.parts
    }

    /// Consumes the read, yielding the assembled buffer.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

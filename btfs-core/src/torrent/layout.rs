//! Piece geometry for a torrent.
//!
//! [`TorrentLayout`] answers the byte-level questions the rest of the crate
//! asks: how big is piece `p`, which piece region does `(file, offset)` land
//! in, and which file ranges make up a piece.

use super::metainfo::TorrentMetadata;

/// Byte extent of one file inside the torrent's contiguous byte space.
#[derive(Debug, Clone, Copy)]
struct FileExtent {
    offset: u64,
    length: u64,
}

/// A contiguous region inside a single piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceRegion {
    pub piece: u32,
    pub start: u32,
    pub length: u32,
}

/// A contiguous range of one file, produced when mapping a piece back onto
/// the file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub file: usize,
    pub offset: u64,
    pub length: u64,
}

/// Immutable piece/file geometry derived from torrent metadata.
#[derive(Debug, Clone)]
pub struct TorrentLayout {
    piece_length: u32,
    total_length: u64,
    num_pieces: u32,
    files: Vec<FileExtent>,
}

impl TorrentLayout {
    /// Builds the layout from parsed metadata. The torrent's total byte
    /// size is the sum of its file sizes.
    pub fn from_metadata(metadata: &TorrentMetadata) -> Self {
        let mut files = Vec::with_capacity(metadata.files.len());
        let mut offset = 0u64;
        for file in &metadata.files {
            files.push(FileExtent {
                offset,
                length: file.size,
            });
            offset += file.size;
        }

        Self {
            piece_length: metadata.pieces.piece_length(),
            total_length: offset,
            num_pieces: metadata.pieces.count(),
            files,
        }
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn num_pieces(&self) -> u32 {
        self.num_pieces
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Returns the size of the given file, or 0 for an unknown index.
    pub fn file_size(&self, file: usize) -> u64 {
        self.files.get(file).map(|f| f.length).unwrap_or(0)
    }

    /// Actual byte size of a piece; the last piece is usually short.
    /// Returns 0 for an out-of-range index.
    pub fn piece_size(&self, piece: u32) -> u32 {
        if piece >= self.num_pieces {
            return 0;
        }
        let start = u64::from(piece) * u64::from(self.piece_length);
        let remaining = self.total_length - start;
        remaining.min(u64::from(self.piece_length)) as u32
    }

    /// Maps `(file, offset, length)` to the piece region it begins in.
    ///
    /// The returned length is clamped to the end of that piece, so a longer
    /// request decomposes by calling this repeatedly with advanced offsets.
    /// Returns `None` for an unknown file or an offset at or past its end.
    pub fn map_file(&self, file: usize, offset: u64, length: u64) -> Option<PieceRegion> {
        let extent = self.files.get(file)?;
        if offset >= extent.length || length == 0 {
            return None;
        }

        let global = extent.offset + offset;
        let piece = (global / u64::from(self.piece_length)) as u32;
        let start = (global % u64::from(self.piece_length)) as u32;
        let room_in_piece = u64::from(self.piece_size(piece)) - u64::from(start);
        let clamped = length.min(room_in_piece).min(extent.length - offset);

        Some(PieceRegion {
            piece,
            start,
            length: clamped as u32,
        })
    }

    /// Decomposes a piece into the file ranges that back it.
    ///
    /// Pieces may straddle file boundaries in multi-file torrents; the
    /// returned spans are in file order and their lengths sum to
    /// [`piece_size`](Self::piece_size).
    pub fn piece_spans(&self, piece: u32) -> Vec<FileSpan> {
        let mut spans = Vec::new();
        let mut remaining = u64::from(self.piece_size(piece));
        let mut cursor = u64::from(piece) * u64::from(self.piece_length);

        for (index, file) in self.files.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let file_end = file.offset + file.length;
            if cursor >= file.offset && cursor < file_end {
                let offset = cursor - file.offset;
                let take = remaining.min(file_end - cursor);
                spans.push(FileSpan {
                    file: index,
                    offset,
                    length: take,
                });
                cursor += take;
                remaining -= take;
            }
        }

        spans
    }
}

//! Torrent domain types: identifiers, priorities and metadata loading.
//!
//! Piece indices are plain `u32`s throughout the crate; the info hash is
//! the only identifier that warrants a real type.

pub mod layout;
pub mod magnet;
pub mod metainfo;

pub use layout::{PieceRegion, TorrentLayout};
pub use magnet::MagnetLink;
pub use metainfo::{PieceTable, TorrentFile, TorrentMetadata};

use std::fmt;

/// 20-byte SHA-1 identity of a torrent's info dictionary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Wraps a raw digest.
    pub fn from_bytes(digest: [u8; 20]) -> Self {
        Self(digest)
    }

    /// Parses the 40-character hex form used in magnet links and tracker
    /// URLs. `None` on wrong length or non-hex input.
    pub fn from_hex(text: &str) -> Option<Self> {
        let decoded = hex::decode(text).ok()?;
        decoded.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

/// Piece priority on the engine's 0..7 scale, where 0 disables fetching.
///
/// The window scheduler only ever uses `High` for the hot prefetch window
/// and `Low` for the cold tail of the current request; `Skip` is what every
/// file starts at so that nothing downloads until a read asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PiecePriority {
    /// Do not fetch.
    Skip = 0,
    /// Background fetch.
    Low = 1,
    /// Engine default.
    Normal = 4,
    /// Fetch ahead of everything else.
    High = 7,
}

impl PiecePriority {
    /// Returns the priority as the engine's raw 0..7 value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Errors raised while loading torrent metadata from a `.torrent` file or a
/// magnet URI.
#[derive(Debug, thiserror::Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] serde_bencode::Error),

    #[error("failed to read metainfo: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid torrent file: {reason}")]
    InvalidTorrent { reason: String },

    #[error("invalid magnet link: {reason}")]
    InvalidMagnet { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_hex_roundtrip() {
        let text = "0123456789abcdef0123456789abcdef01234567";
        let hash = InfoHash::from_hex(text).unwrap();
        assert_eq!(hash.to_string(), text);
        assert_eq!(hash.as_bytes()[0], 0x01);
        assert_eq!(hash.as_bytes()[19], 0x67);
        assert_eq!(format!("{hash:?}"), format!("InfoHash({text})"));
    }

    #[test]
    fn test_info_hash_rejects_bad_hex() {
        assert!(InfoHash::from_hex("abcd").is_none());
        assert!(InfoHash::from_hex(&"zz".repeat(20)).is_none());
    }

    #[test]
    fn test_priority_scale() {
        assert_eq!(PiecePriority::Skip.as_u8(), 0);
        assert_eq!(PiecePriority::Low.as_u8(), 1);
        assert_eq!(PiecePriority::Normal.as_u8(), 4);
        assert_eq!(PiecePriority::High.as_u8(), 7);
        assert!(PiecePriority::High > PiecePriority::Low);
    }
}

//! `.torrent` file parsing.
//!
//! Decodes the bencoded metainfo dictionary into [`TorrentMetadata`]. The
//! info hash is the SHA-1 of the re-encoded `info` dictionary, so it matches
//! what the swarm expects regardless of how the rest of the file is laid out.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};

use super::{InfoHash, MetainfoError};

/// Everything btfs needs from a torrent's metainfo dictionary.
#[derive(Debug, Clone)]
pub struct TorrentMetadata {
    pub name: String,
    pub info_hash: InfoHash,
    pub files: Vec<TorrentFile>,
    pub pieces: PieceTable,
    pub trackers: Vec<String>,
}

impl TorrentMetadata {
    /// Total content size, summed over the file list.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }
}

/// One file entry.
///
/// `path` holds the full component list as the engine reports it: for
/// multi-file torrents the torrent name directory is the first component.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub size: u64,
}

/// The piece side of the metainfo: nominal piece size plus the SHA-1 table,
/// addressed by piece index.
#[derive(Debug, Clone)]
pub struct PieceTable {
    piece_length: u32,
    hashes: Vec<[u8; 20]>,
}

impl PieceTable {
    pub fn new(piece_length: u32, hashes: Vec<[u8; 20]>) -> Self {
        Self {
            piece_length,
            hashes,
        }
    }

    /// Nominal piece size; the torrent's last piece is usually shorter.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Number of pieces in the torrent.
    pub fn count(&self) -> u32 {
        self.hashes.len() as u32
    }

    /// Expected SHA-1 of one piece, if the index is in range.
    pub fn hash(&self, piece: u32) -> Option<&[u8; 20]> {
        self.hashes.get(piece as usize)
    }
}

#[derive(Debug, Deserialize)]
struct RawTorrent {
    info: RawInfo,
    #[serde(default)]
    announce: Option<String>,
    #[serde(rename = "announce-list", default)]
    announce_list: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: i64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    files: Option<Vec<RawFile>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    length: i64,
    path: Vec<String>,
}

fn invalid(reason: impl Into<String>) -> MetainfoError {
    MetainfoError::InvalidTorrent {
        reason: reason.into(),
    }
}

/// Parses torrent metadata from raw bencode bytes.
///
/// # Errors
/// - [`MetainfoError::Bencode`] - malformed bencode
/// - [`MetainfoError::InvalidTorrent`] - missing or inconsistent fields
pub fn parse(data: &[u8]) -> Result<TorrentMetadata, MetainfoError> {
    let info_hash = compute_info_hash(data)?;
    let raw: RawTorrent = serde_bencode::de::from_bytes(data)?;
    convert(raw, info_hash)
}

/// Reads and parses a `.torrent` file from disk.
///
/// # Errors
/// - [`MetainfoError::Io`] - the file cannot be read
/// - any error [`parse`] can return
pub fn load(path: &Path) -> Result<TorrentMetadata, MetainfoError> {
    let data = std::fs::read(path)?;
    parse(&data)
}

/// Reads and parses a `.torrent` file, returning shared metadata.
pub fn load_shared(path: &Path) -> Result<Arc<TorrentMetadata>, MetainfoError> {
    load(path).map(Arc::new)
}

/// SHA-1 over the bencoding of the `info` dictionary.
///
/// The dictionary is extracted as a generic value and re-encoded; bencode
/// dictionaries serialize with sorted keys, so the round trip is canonical.
fn compute_info_hash(data: &[u8]) -> Result<InfoHash, MetainfoError> {
    let value: Value = serde_bencode::de::from_bytes(data)?;
    let Value::Dict(mut dict) = value else {
        return Err(invalid("root element is not a dictionary"));
    };
    let info = dict
        .remove("info".as_bytes())
        .ok_or_else(|| invalid("missing info dictionary"))?;
    let info_bytes = serde_bencode::to_bytes(&info)?;

    let mut hasher = Sha1::new();
    hasher.update(&info_bytes);
    let digest = hasher.finalize();
    Ok(InfoHash::from_bytes(digest.into()))
}

fn convert(raw: RawTorrent, info_hash: InfoHash) -> Result<TorrentMetadata, MetainfoError> {
    let info = raw.info;

    if info.piece_length <= 0 {
        return Err(invalid("non-positive piece length"));
    }
    let piece_length = u32::try_from(info.piece_length)
        .map_err(|_| invalid("piece length does not fit in 32 bits"))?;

    if info.pieces.len() % 20 != 0 {
        return Err(invalid("pieces string is not a multiple of 20 bytes"));
    }
    let hashes: Vec<[u8; 20]> = info
        .pieces
        .chunks(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let files = match (info.length, info.files) {
        (Some(_), Some(_)) => {
            return Err(invalid("both length and files present"));
        }
        (Some(length), None) => {
            let size = u64::try_from(length).map_err(|_| invalid("negative file length"))?;
            vec![TorrentFile {
                path: vec![info.name.clone()],
                size,
            }]
        }
        (None, Some(raw_files)) => {
            let mut files = Vec::with_capacity(raw_files.len());
            for file in raw_files {
                let size =
                    u64::try_from(file.length).map_err(|_| invalid("negative file length"))?;
                if file.path.is_empty() {
                    return Err(invalid("empty file path"));
                }
                let mut path = Vec::with_capacity(file.path.len() + 1);
                path.push(info.name.clone());
                path.extend(file.path);
                files.push(TorrentFile { path, size });
            }
            files
        }
        (None, None) => {
            return Err(invalid("missing length and files"));
        }
    };

    let total: u64 = files.iter().map(|file| file.size).sum();
    let expected_pieces = if total == 0 {
        0
    } else {
        total.div_ceil(u64::from(piece_length))
    };
    if hashes.len() as u64 != expected_pieces {
        return Err(invalid(format!(
            "piece count mismatch: {} hashes for {} pieces",
            hashes.len(),
            expected_pieces
        )));
    }

    let mut trackers = Vec::new();
    if let Some(announce) = raw.announce {
        trackers.push(announce);
    }
    if let Some(tiers) = raw.announce_list {
        for tier in tiers {
            for url in tier {
                if !trackers.contains(&url) {
                    trackers.push(url);
                }
            }
        }
    }

    Ok(TorrentMetadata {
        name: info.name,
        info_hash,
        files,
        pieces: PieceTable::new(piece_length, hashes),
        trackers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bstr(s: &str) -> String {
        format!("{}:{}", s.len(), s)
    }

    fn pieces_for(total: u64, piece_length: u64) -> String {
        let count = if total == 0 {
            0
        } else {
            total.div_ceil(piece_length)
        };
        let blob = "A".repeat(20 * count as usize);
        format!("{}:{}", blob.len(), blob)
    }

    fn single_file_torrent(name: &str, length: u64, piece_length: u64) -> Vec<u8> {
        format!(
            "d8:announce{}4:infod6:lengthi{}e4:name{}12:piece lengthi{}e6:pieces{}ee",
            bstr("http://tracker.example/announce"),
            length,
            bstr(name),
            piece_length,
            pieces_for(length, piece_length),
        )
        .into_bytes()
    }

    fn multi_file_torrent(name: &str, files: &[(&[&str], u64)], piece_length: u64) -> Vec<u8> {
        let total: u64 = files.iter().map(|(_, len)| len).sum();
        let mut file_entries = String::new();
        for (path, length) in files {
            let components: String = path.iter().map(|c| bstr(c)).collect();
            file_entries.push_str(&format!("d6:lengthi{length}e4:pathl{components}ee"));
        }
        format!(
            "d8:announce{}4:infod5:filesl{}e4:name{}12:piece lengthi{}e6:pieces{}ee",
            bstr("http://tracker.example/announce"),
            file_entries,
            bstr(name),
            piece_length,
            pieces_for(total, piece_length),
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_single_file() {
        let metadata = parse(&single_file_torrent("test.txt", 1000, 32768)).unwrap();
        assert_eq!(metadata.name, "test.txt");
        assert_eq!(metadata.pieces.piece_length(), 32768);
        assert_eq!(metadata.pieces.count(), 1);
        assert!(metadata.pieces.hash(0).is_some());
        assert!(metadata.pieces.hash(1).is_none());
        assert_eq!(metadata.total_size(), 1000);
        assert_eq!(metadata.files.len(), 1);
        assert_eq!(metadata.files[0].path, vec!["test.txt".to_string()]);
        assert_eq!(metadata.files[0].size, 1000);
        assert_eq!(metadata.trackers.len(), 1);
    }

    #[test]
    fn test_parse_multi_file_prefixes_name() {
        let data = multi_file_torrent(
            "album",
            &[(&["disc1", "a.flac"], 500), (&["disc1", "b.flac"], 300)],
            32768,
        );
        let metadata = parse(&data).unwrap();
        assert_eq!(metadata.total_size(), 800);
        assert_eq!(metadata.files.len(), 2);
        assert_eq!(
            metadata.files[0].path,
            vec!["album".to_string(), "disc1".to_string(), "a.flac".to_string()]
        );
    }

    #[test]
    fn test_info_hash_is_stable() {
        let data = single_file_torrent("test.txt", 1000, 32768);
        let first = parse(&data).unwrap();
        let second = parse(&data).unwrap();
        assert_eq!(first.info_hash, second.info_hash);

        let other = parse(&single_file_torrent("other.txt", 1000, 32768)).unwrap();
        assert_ne!(first.info_hash, other.info_hash);
    }

    #[test]
    fn test_missing_info_rejected() {
        let result = parse(b"d8:announce4:teste");
        assert!(matches!(
            result,
            Err(MetainfoError::InvalidTorrent { .. })
        ));
    }

    #[test]
    fn test_root_must_be_dictionary() {
        let result = parse(b"l4:teste");
        assert!(result.is_err());
    }

    #[test]
    fn test_ragged_pieces_rejected() {
        let data = format!(
            "d4:infod6:lengthi1000e4:name4:file12:piece lengthi32768e6:pieces19:{}ee",
            "A".repeat(19)
        );
        let result = parse(data.as_bytes());
        assert!(matches!(
            result,
            Err(MetainfoError::InvalidTorrent { .. })
        ));
    }

    #[test]
    fn test_piece_count_mismatch_rejected() {
        // 70000 bytes at 32 KiB pieces needs 3 hashes; supply 1.
        let data = format!(
            "d4:infod6:lengthi70000e4:name4:file12:piece lengthi32768e6:pieces20:{}ee",
            "A".repeat(20)
        );
        let result = parse(data.as_bytes());
        assert!(matches!(
            result,
            Err(MetainfoError::InvalidTorrent { .. })
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.torrent");
        std::fs::write(&path, single_file_torrent("test.txt", 1000, 32768)).unwrap();

        let metadata = load(&path).unwrap();
        assert_eq!(metadata.name, "test.txt");
        assert!(load(&dir.path().join("missing.torrent")).is_err());
    }
}

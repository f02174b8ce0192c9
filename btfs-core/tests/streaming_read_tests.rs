//! End-to-end reads through the session, reactor and simulation engine.
//!
//! No network anywhere: the simulation engine plays the swarm, and reads go
//! through exactly the path a FUSE worker thread would take.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use btfs_core::engine::sim::{SimContent, SimulationEngine};
use btfs_core::torrent::metainfo::{PieceTable, TorrentFile, TorrentMetadata};
use btfs_core::{BtfsConfig, FsError, InfoHash, MagnetLink, Session, TorrentSource};

fn metadata(name: &str, piece_length: u32, files: &[(&[&str], u64)]) -> Arc<TorrentMetadata> {
    let total: u64 = files.iter().map(|(_, len)| len).sum();
    let pieces = total.div_ceil(u64::from(piece_length));
    Arc::new(TorrentMetadata {
        name: name.to_string(),
        info_hash: InfoHash::from_bytes([3u8; 20]),
        files: files
            .iter()
            .map(|(path, size)| TorrentFile {
                path: path.iter().map(|s| s.to_string()).collect(),
                size: *size,
            })
            .collect(),
        pieces: PieceTable::new(piece_length, vec![[0u8; 20]; pieces as usize]),
        trackers: vec![],
    })
}

fn fast_config() -> BtfsConfig {
    let mut config = BtfsConfig::default();
    config.engine.download_limit = 0;
    config
}

fn start_session(engine: SimulationEngine, source: TorrentSource) -> (Session, tempfile::TempDir) {
    let save = tempfile::tempdir().unwrap();
    let session = Session::start(Arc::new(engine), fast_config(), source, save.path()).unwrap();
    (session, save)
}

fn wait_ready(session: &Session) -> Arc<btfs_core::PieceReactor> {
    let reactor = session.reactor();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !reactor.is_ready() {
        assert!(Instant::now() < deadline, "metadata never arrived");
        std::thread::sleep(Duration::from_millis(1));
    }
    reactor
}

#[test]
fn test_single_file_read_matches_generated_pattern() {
    let md = metadata("f", 65536, &[(&["f"], 65536)]);
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::Generated),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);

    let ino = reactor.resolve_path("/f").unwrap().ino;
    let buf = reactor.read(ino, 0, 65536).unwrap();
    assert_eq!(buf.len(), 65536);
    for (i, byte) in buf.iter().enumerate() {
        assert_eq!(*byte, (i % 256) as u8, "byte {i}");
    }
}

#[test]
fn test_sequential_reads_keep_cursor_moving_forward() {
    let md = metadata("movie.mkv", 16384, &[(&["movie.mkv"], 16384 * 10)]);
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::Generated),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);
    let ino = reactor.resolve_path("/movie.mkv").unwrap().ino;

    let mut last_cursor = 0;
    for chunk in 0..5u64 {
        let offset = chunk * 32768;
        let buf = reactor.read(ino, offset, 32768).unwrap();
        assert_eq!(buf.len(), 32768);
        for (i, byte) in buf.iter().enumerate() {
            assert_eq!(*byte, ((offset + i as u64) % 256) as u8);
        }

        let cursor = reactor.cursor().unwrap();
        assert!(cursor >= last_cursor, "cursor went backwards");
        last_cursor = cursor;
    }
}

#[test]
fn test_preloaded_image_roundtrip() {
    let image: Vec<u8> = (0..50000u32).map(|i| (i.wrapping_mul(7) % 256) as u8).collect();
    let md = metadata("blob", 16384, &[(&["blob"], 50000)]);
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::Preloaded(Bytes::from(image.clone()))),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);
    let ino = reactor.resolve_path("/blob").unwrap().ino;

    // Crosses two piece boundaries.
    let buf = reactor.read(ino, 10000, 30000).unwrap();
    assert_eq!(&buf[..], &image[10000..40000]);
}

#[test]
fn test_tail_read_is_clamped() {
    let md = metadata("small", 16384, &[(&["small"], 1000)]);
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::Generated),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);
    let ino = reactor.resolve_path("/small").unwrap().ino;

    let buf = reactor.read(ino, 900, 500).unwrap();
    assert_eq!(buf.len(), 100);
    for (i, byte) in buf.iter().enumerate() {
        assert_eq!(*byte, ((900 + i) % 256) as u8);
    }

    assert_eq!(reactor.read(ino, 1000, 10).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_nested_directories_and_attributes() {
    let md = metadata(
        "album",
        16384,
        &[
            (&["album", "disc1", "a.flac"], 20000),
            (&["album", "disc1", "b.flac"], 30000),
            (&["album", "cover.jpg"], 5000),
        ],
    );
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::Generated),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);

    let root = reactor.readdir(btfs_core::ROOT_INO).unwrap();
    let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "album"]);

    let album = reactor.resolve_path("/album").unwrap();
    let names: Vec<String> = reactor
        .readdir(album.ino)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec![".", "..", "cover.jpg", "disc1"]);

    let a = reactor.resolve_path("/album/disc1/a.flac").unwrap();
    assert_eq!(a.size, 20000);
    assert_eq!(a.kind, btfs_core::fs::EntryKind::File);
}

#[test]
fn test_open_rejects_directories_and_unknown_paths() {
    let md = metadata("album", 16384, &[(&["album", "a.bin"], 1000)]);
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::Generated),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);

    let album = reactor.resolve_path("/album").unwrap();
    assert_eq!(reactor.open(album.ino), Err(FsError::IsDirectory));
    assert_eq!(reactor.open(9999), Err(FsError::NotFound));

    let file = reactor.resolve_path("/album/a.bin").unwrap();
    assert_eq!(reactor.open(file.ino), Ok(()));
}

#[test]
fn test_magnet_mount_reads_after_metadata() {
    let engine = SimulationEngine::new(SimContent::Generated);
    engine.set_magnet_metadata(
        metadata("f", 16384, &[(&["f"], 40000)]),
        Duration::from_millis(20),
    );
    let link = MagnetLink {
        info_hash: InfoHash::from_bytes([3u8; 20]),
        display_name: Some("f".to_string()),
        trackers: vec!["udp://tracker.example:6969".to_string()],
    };
    let (session, _save) = start_session(engine, TorrentSource::Magnet(link));

    let reactor = session.reactor();
    assert!(!reactor.is_ready());

    let reactor = wait_ready(&session);
    let ino = reactor.resolve_path("/f").unwrap().ino;
    let buf = reactor.read(ino, 16000, 8000).unwrap();
    assert_eq!(buf.len(), 8000);
    for (i, byte) in buf.iter().enumerate() {
        assert_eq!(*byte, ((16000 + i) % 256) as u8);
    }
}

#[test]
fn test_shutdown_wakes_blocked_read() {
    // Seed directory without content: pieces can never arrive.
    let seed = tempfile::tempdir().unwrap();
    let md = metadata("f", 16384, &[(&["f"], 16384)]);
    let (session, _save) = start_session(
        SimulationEngine::new(SimContent::SeedDir(seed.path().to_path_buf())),
        TorrentSource::Metainfo(md),
    );
    let reactor = wait_ready(&session);
    let ino = reactor.resolve_path("/f").unwrap().ino;

    let worker = {
        let reactor = Arc::clone(&reactor);
        std::thread::spawn(move || reactor.read(ino, 0, 100))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while reactor.active_reads() != 1 {
        assert!(Instant::now() < deadline, "read never registered");
        std::thread::sleep(Duration::from_millis(1));
    }

    session.shutdown();
    assert_eq!(worker.join().unwrap(), Err(FsError::ShuttingDown));
}

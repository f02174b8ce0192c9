//! Deterministic in-process swarm engine.
//!
//! [`SimulationEngine`] behaves like a swarm with one well-seeded peer: a
//! worker thread "downloads" the highest-priority missing piece at the
//! configured rate and emits [`Alert::PieceFinished`], and `read_piece`
//! requests answer with [`Alert::ReadPiece`]. Piece payloads come from one of
//! three sources: a deterministic generated pattern (tests), a preloaded byte
//! image (tests), or a local seed copy of the content read through the piece
//! layout (development mounts).
//!
//! Pieces start at priority 0 and are fetched only once something raises
//! their priority, so mounts stay idle until a read steers the window.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::{Alert, EngineError, TorrentEngine, TorrentSource};
use crate::config::EngineConfig;
use crate::torrent::{PiecePriority, TorrentLayout, TorrentMetadata};

/// Where simulated piece payloads come from.
#[derive(Debug, Clone)]
pub enum SimContent {
    /// Each byte equals its torrent-global offset modulo 256.
    Generated,
    /// A complete in-memory image of the torrent's byte space.
    Preloaded(Bytes),
    /// A directory holding a (possibly partial) copy of the content, laid
    /// out exactly as the torrent's file list describes.
    SeedDir(PathBuf),
}

struct State {
    content: SimContent,
    metadata: Option<Arc<TorrentMetadata>>,
    layout: Option<TorrentLayout>,
    /// Metadata to hand out after `metadata_due`, for magnet sources.
    magnet_metadata: Option<Arc<TorrentMetadata>>,
    metadata_delay: Duration,
    metadata_due: Option<Instant>,
    have: Vec<bool>,
    priorities: Vec<u8>,
    /// Pieces whose source failed; retried when their priority changes.
    stalled: Vec<bool>,
    download_limit: u64,
    added: bool,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    work: Condvar,
    alerts_tx: Sender<Alert>,
    alerts_rx: Receiver<Alert>,
    stop: AtomicBool,
}

/// Deterministic swarm engine used by the test suite and `--seed` mounts.
pub struct SimulationEngine {
    shared: Arc<Shared>,
}

impl SimulationEngine {
    /// Creates an engine serving pieces from the given content source.
    pub fn new(content: SimContent) -> Self {
        let (alerts_tx, alerts_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    content,
                    metadata: None,
                    layout: None,
                    magnet_metadata: None,
                    metadata_delay: Duration::from_millis(10),
                    metadata_due: None,
                    have: Vec::new(),
                    priorities: Vec::new(),
                    stalled: Vec::new(),
                    download_limit: 0,
                    added: false,
                    worker: None,
                }),
                work: Condvar::new(),
                alerts_tx,
                alerts_rx,
                stop: AtomicBool::new(false),
            }),
        }
    }

    /// Preloads the metadata a magnet source will "fetch from the swarm"
    /// after `delay`. Must be called before `add_torrent`.
    pub fn set_magnet_metadata(&self, metadata: Arc<TorrentMetadata>, delay: Duration) {
        let mut state = self.shared.state.lock();
        state.magnet_metadata = Some(metadata);
        state.metadata_delay = delay;
    }

    /// Marks a piece as already present, as if fetched in an earlier run.
    pub fn set_have(&self, piece: u32) {
        let mut state = self.shared.state.lock();
        let index = piece as usize;
        if index < state.have.len() {
            state.have[index] = true;
        }
    }

    /// Snapshot of raw per-piece priorities, for inspection in tests.
    pub fn piece_priorities(&self) -> Vec<u8> {
        self.shared.state.lock().priorities.clone()
    }

    fn spawn_worker(&self, state: &mut State) -> Result<(), EngineError> {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("sim-swarm".to_string())
            .spawn(move || worker_loop(&shared))?;
        state.worker = Some(handle);
        Ok(())
    }
}

impl TorrentEngine for SimulationEngine {
    fn apply_settings(&self, config: &EngineConfig) {
        debug!(
            ports = ?config.listen_port_range,
            end_game = config.strict_end_game_mode,
            "simulation engine configured"
        );
    }

    fn add_torrent(&self, source: TorrentSource, save_path: &Path) -> Result<(), EngineError> {
        let has_metadata;
        {
            let mut state = self.shared.state.lock();
            if state.added {
                return Err(EngineError::AlreadyAdded);
            }
            state.added = true;
            debug!(save_path = %save_path.display(), "torrent enqueued");

            match source {
                TorrentSource::Metainfo(metadata) => {
                    install_metadata(&mut state, metadata);
                    has_metadata = true;
                }
                TorrentSource::Magnet(link) => {
                    trace!(info_hash = %link.info_hash, "magnet enqueued");
                    if state.magnet_metadata.is_some() {
                        state.metadata_due = Some(Instant::now() + state.metadata_delay);
                    }
                    has_metadata = false;
                }
            }
            self.spawn_worker(&mut state)?;
        }

        let _ = self.shared.alerts_tx.send(Alert::TorrentAdded { has_metadata });
        Ok(())
    }

    fn alerts(&self) -> Receiver<Alert> {
        self.shared.alerts_rx.clone()
    }

    fn metadata(&self) -> Option<Arc<TorrentMetadata>> {
        self.shared.state.lock().metadata.clone()
    }

    fn have_piece(&self, piece: u32) -> bool {
        let state = self.shared.state.lock();
        state.have.get(piece as usize).copied().unwrap_or(false)
    }

    fn read_piece(&self, piece: u32) {
        let data = {
            let state = self.shared.state.lock();
            let index = piece as usize;
            if !state.have.get(index).copied().unwrap_or(false) {
                trace!(piece, "read_piece for absent piece ignored");
                return;
            }
            match piece_bytes(&state, piece) {
                Ok(data) => data,
                Err(e) => {
                    warn!(piece, error = %e, "piece payload unavailable");
                    return;
                }
            }
        };
        let _ = self.shared.alerts_tx.send(Alert::ReadPiece { piece, data });
    }

    fn piece_priority(&self, piece: u32, priority: PiecePriority) {
        let mut state = self.shared.state.lock();
        let index = piece as usize;
        if index < state.priorities.len() {
            state.priorities[index] = priority.as_u8();
            state.stalled[index] = false;
            self.shared.work.notify_all();
        }
    }

    fn file_priority(&self, file: usize, priority: PiecePriority) {
        let mut state = self.shared.state.lock();
        let Some(layout) = state.layout.as_ref() else {
            return;
        };
        let size = layout.file_size(file);
        if size == 0 {
            return;
        }
        let Some(first) = layout.map_file(file, 0, 1) else {
            return;
        };
        let Some(last) = layout.map_file(file, size - 1, 1) else {
            return;
        };
        for index in first.piece..=last.piece {
            state.priorities[index as usize] = priority.as_u8();
        }
        self.shared.work.notify_all();
    }

    fn set_download_limit(&self, bytes_per_second: u64) {
        let mut state = self.shared.state.lock();
        state.download_limit = bytes_per_second;
        self.shared.work.notify_all();
    }

    fn set_upload_limit(&self, bytes_per_second: u64) {
        trace!(bytes_per_second, "upload limit set (no simulated uploads)");
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.work.notify_all();
        let worker = self.shared.state.lock().worker.take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

fn install_metadata(state: &mut State, metadata: Arc<TorrentMetadata>) {
    let layout = TorrentLayout::from_metadata(&metadata);
    let pieces = layout.num_pieces() as usize;
    state.have = vec![false; pieces];
    state.priorities = vec![0; pieces];
    state.stalled = vec![false; pieces];
    state.layout = Some(layout);
    state.metadata = Some(metadata);
}

/// Highest-priority missing piece, lowest index on ties.
fn next_candidate(state: &State) -> Option<u32> {
    let mut best: Option<(u8, u32)> = None;
    for (index, &priority) in state.priorities.iter().enumerate() {
        if priority == 0 || state.have[index] || state.stalled[index] {
            continue;
        }
        if best.map(|(p, _)| priority > p).unwrap_or(true) {
            best = Some((priority, index as u32));
        }
    }
    best.map(|(_, index)| index)
}

/// Time the simulated swarm takes to move one piece; zero when unlimited.
fn transfer_delay(state: &State, size: u32) -> Duration {
    match state.download_limit {
        0 | u64::MAX => Duration::ZERO,
        limit => Duration::from_secs_f64(f64::from(size) / limit as f64),
    }
}

fn piece_bytes(state: &State, piece: u32) -> std::io::Result<Bytes> {
    let layout = state
        .layout
        .as_ref()
        .ok_or_else(|| std::io::Error::other("no metadata"))?;
    let size = layout.piece_size(piece) as usize;
    let global = u64::from(piece) * u64::from(layout.piece_length());

    match &state.content {
        SimContent::Generated => {
            let mut data = vec![0u8; size];
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = ((global + i as u64) % 256) as u8;
            }
            Ok(Bytes::from(data))
        }
        SimContent::Preloaded(image) => {
            let start = global as usize;
            let end = start + size;
            if end > image.len() {
                return Err(std::io::Error::other("preloaded image too short"));
            }
            Ok(image.slice(start..end))
        }
        SimContent::SeedDir(dir) => {
            let metadata = state
                .metadata
                .as_ref()
                .ok_or_else(|| std::io::Error::other("no metadata"))?;
            let mut data = Vec::with_capacity(size);
            for span in layout.piece_spans(piece) {
                let relative: PathBuf = metadata.files[span.file].path.iter().collect();
                let mut file = std::fs::File::open(dir.join(relative))?;
                file.seek(SeekFrom::Start(span.offset))?;
                let mut chunk = vec![0u8; span.length as usize];
                file.read_exact(&mut chunk)?;
                data.extend_from_slice(&chunk);
            }
            Ok(Bytes::from(data))
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let mut state = shared.state.lock();

        // Magnet sources surface their metadata after the configured delay.
        if let Some(due) = state.metadata_due {
            let now = Instant::now();
            if now < due {
                shared.work.wait_for(&mut state, due - now);
                continue;
            }
            state.metadata_due = None;
            if let Some(metadata) = state.magnet_metadata.take() {
                install_metadata(&mut state, metadata);
                drop(state);
                let _ = shared.alerts_tx.send(Alert::MetadataReceived);
                continue;
            }
        }

        let Some(piece) = next_candidate(&state) else {
            shared.work.wait_for(&mut state, Duration::from_millis(50));
            continue;
        };
        let delay = state
            .layout
            .as_ref()
            .map(|layout| transfer_delay(&state, layout.piece_size(piece)))
            .unwrap_or(Duration::ZERO);
        drop(state);

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        {
            let mut state = shared.state.lock();
            let index = piece as usize;
            if !state.have.get(index).copied().unwrap_or(true) {
                match piece_bytes(&state, piece) {
                    Ok(_) => {
                        // Enqueued under the lock so the finished alert is
                        // ordered before any read-piece reply for it.
                        state.have[index] = true;
                        let _ = shared.alerts_tx.send(Alert::PieceFinished { piece });
                    }
                    Err(e) => {
                        trace!(piece, error = %e, "piece source unavailable");
                        state.stalled[index] = true;
                    }
                }
            }
        }
    }
}

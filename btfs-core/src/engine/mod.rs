//! The swarm engine seam.
//!
//! btfs never speaks the peer wire protocol itself. Everything it needs from
//! a BitTorrent engine is captured by [`TorrentEngine`]: enqueue one torrent,
//! steer piece and file priorities, ask for piece payloads, and consume the
//! engine's asynchronous [`Alert`] stream. The in-tree implementation is the
//! deterministic [`sim::SimulationEngine`]; a production backend implements
//! the same trait.

pub mod sim;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Receiver;

use crate::config::EngineConfig;
use crate::torrent::{MagnetLink, PiecePriority, TorrentMetadata};

/// How the torrent to mount is specified.
#[derive(Debug, Clone)]
pub enum TorrentSource {
    /// Full metadata from a `.torrent` file.
    Metainfo(Arc<TorrentMetadata>),
    /// Magnet link; metadata arrives from the swarm later.
    Magnet(MagnetLink),
}

/// Asynchronous event emitted by the engine.
///
/// Payload buffers are owned by the alert; handlers copy out what they need
/// before the alert is dropped.
#[derive(Debug, Clone)]
pub enum Alert {
    /// The torrent was enqueued. Metadata may or may not be known yet.
    TorrentAdded { has_metadata: bool },
    /// Metadata arrived from the swarm (magnet downloads).
    MetadataReceived,
    /// A metadata fetch attempt failed; the engine keeps trying.
    MetadataFailed,
    /// A piece finished downloading and passed its hash check.
    PieceFinished { piece: u32 },
    /// Payload for an earlier [`TorrentEngine::read_piece`] request.
    ReadPiece { piece: u32, data: Bytes },
    /// Anything btfs does not care about.
    Other,
}

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("a torrent is already added to this engine")]
    AlreadyAdded,

    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interface to a BitTorrent engine.
///
/// Implementations must be internally synchronized: methods are invoked from
/// filesystem worker threads (under the reactor lock) and must not call back
/// into the reactor. Results of `read_piece` and metadata fetches are
/// delivered through the alert channel, never synchronously.
pub trait TorrentEngine: Send + Sync {
    /// Applies session-wide settings. Called once, before `add_torrent`.
    fn apply_settings(&self, config: &EngineConfig);

    /// Enqueues the torrent asynchronously in non-paused, non-auto-managed
    /// mode. Completion is signaled by [`Alert::TorrentAdded`].
    ///
    /// # Errors
    /// - [`EngineError::AlreadyAdded`] - the engine already holds a torrent
    fn add_torrent(&self, source: TorrentSource, save_path: &Path) -> Result<(), EngineError>;

    /// Returns a handle to the engine's alert stream.
    fn alerts(&self) -> Receiver<Alert>;

    /// Snapshot of the torrent metadata, once known.
    fn metadata(&self) -> Option<Arc<TorrentMetadata>>;

    /// Whether the engine has verified and stored the given piece.
    fn have_piece(&self, piece: u32) -> bool;

    /// Requests the payload of a present piece; it arrives as
    /// [`Alert::ReadPiece`].
    fn read_piece(&self, piece: u32);

    /// Sets the download priority of one piece. Out-of-range indices are
    /// ignored.
    fn piece_priority(&self, piece: u32, priority: PiecePriority);

    /// Sets the priority of every piece overlapping the given file.
    fn file_priority(&self, file: usize, priority: PiecePriority);

    /// Caps download bandwidth in bytes per second.
    fn set_download_limit(&self, bytes_per_second: u64);

    /// Caps upload bandwidth in bytes per second.
    fn set_upload_limit(&self, bytes_per_second: u64);
}

//! btfs-core — mount a BitTorrent swarm as a read-only on-demand filesystem.
//!
//! The pieces fit together like this: the [`session`] façade owns a
//! [`engine::TorrentEngine`] and pumps its alert stream; once metadata is
//! known, [`fs::DirectoryIndex`] exposes the torrent's files as a directory
//! tree; each VFS read becomes a [`fs::read::ReadRequest`] registered with
//! the [`fs::PieceReactor`], which blocks the caller until the pieces it
//! spans arrive; and the [`fs::window::PieceWindow`] keeps steering piece
//! priorities toward the most recently requested byte range so sequential
//! reads stream well.

pub mod config;
pub mod engine;
pub mod fs;
pub mod session;
pub mod torrent;
pub mod tracing_setup;

pub use config::BtfsConfig;
pub use engine::{Alert, EngineError, TorrentEngine, TorrentSource};
pub use fs::{DirectoryIndex, FsError, PieceReactor, ROOT_INO};
pub use session::Session;
pub use torrent::{InfoHash, MagnetLink, MetainfoError, PiecePriority, TorrentMetadata};

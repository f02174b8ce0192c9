//! The filesystem core: directory index, read decomposition, the blocking
//! read–piece reactor and the sliding priority window.

pub mod index;
pub mod read;
pub mod reactor;
pub mod window;

pub use index::{DirEntry, DirectoryIndex, EntryAttr, EntryKind, ROOT_INO};
pub use reactor::PieceReactor;

/// Filesystem-surface errors, mapped to errnos at the FUSE boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("access denied")]
    AccessDenied,

    #[error("filesystem is shutting down")]
    ShuttingDown,
}

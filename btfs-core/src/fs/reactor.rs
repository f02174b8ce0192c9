//! The read–piece reactor.
//!
//! One mutex guards everything the filesystem shares between FUSE worker
//! threads and the alert pump: the directory index, the piece layout, the
//! set of in-flight reads and the priority window. Reads block on a condvar
//! until the alert pump has delivered every piece they span. The lock is
//! coarse by design; the critical sections are short memcpys and priority
//! updates, dwarfed by network latency.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

use super::index::{DirEntry, DirectoryIndex, EntryAttr};
use super::read::ReadRequest;
use super::window::PieceWindow;
use super::FsError;
use crate::engine::TorrentEngine;
use crate::torrent::{TorrentLayout, TorrentMetadata};

struct ReactorState {
    index: DirectoryIndex,
    layout: Option<TorrentLayout>,
    window: Option<PieceWindow>,
    reads: HashMap<u64, ReadRequest>,
    next_read_id: u64,
    shutdown: bool,
}

/// Shared hub gating VFS reads on piece arrival.
pub struct PieceReactor {
    engine: Arc<dyn TorrentEngine>,
    head_bytes: u64,
    state: Mutex<ReactorState>,
    piece_delivered: Condvar,
}

impl PieceReactor {
    pub fn new(engine: Arc<dyn TorrentEngine>, head_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            engine,
            head_bytes,
            state: Mutex::new(ReactorState {
                index: DirectoryIndex::empty(),
                layout: None,
                window: None,
                reads: HashMap::new(),
                next_read_id: 0,
                shutdown: false,
            }),
            piece_delivered: Condvar::new(),
        })
    }

    pub fn engine(&self) -> &Arc<dyn TorrentEngine> {
        &self.engine
    }

    /// True once metadata has been installed and files are visible.
    pub fn is_ready(&self) -> bool {
        self.state.lock().layout.is_some()
    }

    /// Builds the directory index, layout and window from torrent metadata.
    /// Idempotent; later calls are ignored.
    pub fn install_metadata(&self, metadata: &TorrentMetadata) {
        let mut state = self.state.lock();
        if state.layout.is_some() {
            return;
        }
        let layout = TorrentLayout::from_metadata(metadata);
        info!(
            name = %metadata.name,
            files = metadata.files.len(),
            pieces = layout.num_pieces(),
            "metadata ready"
        );
        state.window = Some(PieceWindow::new(&layout, self.head_bytes));
        state.index = DirectoryIndex::from_files(&metadata.files);
        state.layout = Some(layout);
    }

    pub fn getattr(&self, ino: u64) -> Result<EntryAttr, FsError> {
        self.state.lock().index.getattr(ino)
    }

    pub fn lookup(&self, parent: u64, name: &str) -> Result<EntryAttr, FsError> {
        self.state.lock().index.lookup(parent, name)
    }

    pub fn readdir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        self.state.lock().index.readdir(ino)
    }

    /// Open-time checks for a file inode. Access-mode enforcement happens at
    /// the FUSE boundary where the flags live.
    pub fn open(&self, ino: u64) -> Result<(), FsError> {
        self.state.lock().index.file_at(ino).map(|_| ())
    }

    /// Resolves an absolute path; mainly for tests and tooling.
    pub fn resolve_path(&self, path: &str) -> Result<EntryAttr, FsError> {
        self.state.lock().index.resolve(path)
    }

    /// Current window cursor, once metadata is known.
    pub fn cursor(&self) -> Option<u32> {
        self.state.lock().window.as_ref().map(|w| w.cursor())
    }

    /// Number of reads currently waiting on pieces.
    pub fn active_reads(&self) -> usize {
        self.state.lock().reads.len()
    }

    /// Reads up to `size` bytes at `offset` from the file at `ino`,
    /// blocking until every piece the range spans has been delivered.
    ///
    /// # Errors
    /// - [`FsError::NotFound`] - unknown inode
    /// - [`FsError::IsDirectory`] - the inode names a directory
    /// - [`FsError::ShuttingDown`] - teardown interrupted the wait
    pub fn read(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(FsError::ShuttingDown);
        }
        let (file_index, _) = state.index.file_at(ino)?;
        let Some(layout) = state.layout.as_ref() else {
            return Err(FsError::NotFound);
        };

        let read = ReadRequest::new(layout, file_index, offset, u64::from(size));
        if read.is_empty() {
            return Ok(Vec::new());
        }
        trace!(ino, offset, size, parts = read.parts().len(), "read starts");

        // Pieces already present can be delivered right away; everything
        // else is pulled in by steering the window at the request.
        read.trigger(self.engine.as_ref());
        let hint = read.len() as u64;
        if let (Some(window), Some(first)) = (state.window.as_mut(), read.first_piece()) {
            window.jump(self.engine.as_ref(), first, hint);
        }

        let id = state.next_read_id;
        state.next_read_id += 1;
        state.reads.insert(id, read);

        loop {
            if state.shutdown {
                break;
            }
            let done = state.reads.get(&id).map_or(true, ReadRequest::finished);
            if done {
                break;
            }
            // Spurious wakes are fine; the loop re-tests completion.
            self.piece_delivered.wait(&mut state);
        }

        match state.reads.remove(&id) {
            Some(read) if read.finished() => {
                trace!(ino, offset, len = read.len(), "read finished");
                Ok(read.into_buffer())
            }
            _ => Err(FsError::ShuttingDown),
        }
    }

    /// Alert handler: a requested piece payload arrived. Copies it into
    /// every interested read and wakes all waiters; several reads may
    /// depend on the same piece.
    pub fn handle_read_piece(&self, piece: u32, data: &[u8]) {
        let mut state = self.state.lock();
        trace!(piece, size = data.len(), "piece delivered");
        for read in state.reads.values_mut() {
            read.copy(piece, data);
        }
        drop(state);
        self.piece_delivered.notify_all();
    }

    /// Alert handler: a piece finished downloading. Lets every read request
    /// delivery of whatever it now can, then slides the window. The payload
    /// itself arrives in a later read-piece alert, so nobody is woken here.
    pub fn handle_piece_finished(&self, piece: u32) {
        let mut state = self.state.lock();
        trace!(piece, "piece finished");
        for read in state.reads.values() {
            read.trigger(self.engine.as_ref());
        }
        if let Some(window) = state.window.as_mut() {
            window.advance(self.engine.as_ref());
        }
    }

    /// Marks the reactor as shutting down and wakes every blocked read;
    /// they fail with [`FsError::ShuttingDown`] instead of waiting forever.
    pub fn begin_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        let pending = state.reads.len();
        drop(state);
        if pending > 0 {
            debug!(pending, "interrupting blocked reads for teardown");
        }
        self.piece_delivered.notify_all();
    }
}

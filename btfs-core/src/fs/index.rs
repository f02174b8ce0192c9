//! Directory tree over a torrent's file list.
//!
//! Built once when metadata becomes available and immutable afterwards. The
//! tree is inode-addressed for the kernel's benefit (root is always inode 1)
//! and path-addressed for everything else. Lookups are byte-exact.

use std::collections::BTreeMap;

use tracing::warn;

use super::FsError;
use crate::torrent::metainfo::TorrentFile;

/// Inode of the filesystem root. Present even before metadata arrives.
pub const ROOT_INO: u64 = 1;

/// What kind of entry an inode names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Attributes of one entry, as reported to the VFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAttr {
    pub ino: u64,
    pub kind: EntryKind,
    pub size: u64,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Debug)]
enum NodeKind {
    Directory { children: BTreeMap<String, u64> },
    File { size: u64, file_index: usize },
}

#[derive(Debug)]
struct Node {
    parent: u64,
    kind: NodeKind,
}

/// Immutable mapping from paths/inodes to torrent files.
#[derive(Debug)]
pub struct DirectoryIndex {
    nodes: Vec<Node>,
}

impl DirectoryIndex {
    /// An index holding only the root directory.
    pub fn empty() -> Self {
        Self {
            nodes: vec![Node {
                parent: ROOT_INO,
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
            }],
        }
    }

    /// Builds the tree from the torrent's file list. `file_index` is each
    /// file's position in the list, which is how the engine addresses it.
    pub fn from_files(files: &[TorrentFile]) -> Self {
        let mut index = Self::empty();
        for (file_index, file) in files.iter().enumerate() {
            index.insert(file, file_index);
        }
        index
    }

    fn insert(&mut self, file: &TorrentFile, file_index: usize) {
        let components: Vec<&String> = file.path.iter().filter(|c| !c.is_empty()).collect();
        let Some((last, dirs)) = components.split_last() else {
            return;
        };

        let mut current = ROOT_INO;
        for component in dirs {
            current = self.child_dir(current, component.as_str());
        }

        let ino = (self.nodes.len() + 1) as u64;
        let Node {
            kind: NodeKind::Directory { children },
            ..
        } = &mut self.nodes[(current - 1) as usize]
        else {
            warn!(path = ?file.path, "file path collides with an existing file");
            return;
        };
        if children.contains_key(last.as_str()) {
            warn!(path = ?file.path, "duplicate path in torrent ignored");
            return;
        }
        children.insert((*last).clone(), ino);
        self.nodes.push(Node {
            parent: current,
            kind: NodeKind::File {
                size: file.size,
                file_index,
            },
        });
    }

    /// Finds or creates the child directory `name` of `parent`.
    fn child_dir(&mut self, parent: u64, name: &str) -> u64 {
        if let Node {
            kind: NodeKind::Directory { children },
            ..
        } = &self.nodes[(parent - 1) as usize]
        {
            if let Some(&existing) = children.get(name) {
                return existing;
            }
        }

        let ino = (self.nodes.len() + 1) as u64;
        self.nodes.push(Node {
            parent,
            kind: NodeKind::Directory {
                children: BTreeMap::new(),
            },
        });
        if let Node {
            kind: NodeKind::Directory { children },
            ..
        } = &mut self.nodes[(parent - 1) as usize]
        {
            children.insert(name.to_string(), ino);
        }
        ino
    }

    fn node(&self, ino: u64) -> Option<&Node> {
        if ino == 0 {
            return None;
        }
        self.nodes.get((ino - 1) as usize)
    }

    fn attr_of(&self, ino: u64, node: &Node) -> EntryAttr {
        match node.kind {
            NodeKind::Directory { .. } => EntryAttr {
                ino,
                kind: EntryKind::Directory,
                size: 0,
            },
            NodeKind::File { size, .. } => EntryAttr {
                ino,
                kind: EntryKind::File,
                size,
            },
        }
    }

    /// Attributes of an inode.
    ///
    /// # Errors
    /// - [`FsError::NotFound`] - unknown inode
    pub fn getattr(&self, ino: u64) -> Result<EntryAttr, FsError> {
        self.node(ino)
            .map(|node| self.attr_of(ino, node))
            .ok_or(FsError::NotFound)
    }

    /// Resolves `name` within the directory `parent`.
    ///
    /// # Errors
    /// - [`FsError::NotFound`] - unknown parent or name
    /// - [`FsError::NotDirectory`] - `parent` names a file
    pub fn lookup(&self, parent: u64, name: &str) -> Result<EntryAttr, FsError> {
        let node = self.node(parent).ok_or(FsError::NotFound)?;
        let NodeKind::Directory { children } = &node.kind else {
            return Err(FsError::NotDirectory);
        };
        let ino = *children.get(name).ok_or(FsError::NotFound)?;
        self.getattr(ino)
    }

    /// Resolves an absolute path like `/a/b/c`, byte-exact per component.
    pub fn resolve(&self, path: &str) -> Result<EntryAttr, FsError> {
        let mut current = ROOT_INO;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.lookup(current, component)?.ino;
        }
        self.getattr(current)
    }

    /// Lists a directory: `.` and `..` first, then children in byte order.
    ///
    /// # Errors
    /// - [`FsError::NotFound`] - unknown inode
    /// - [`FsError::NotDirectory`] - `ino` names a file
    pub fn readdir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let node = self.node(ino).ok_or(FsError::NotFound)?;
        let NodeKind::Directory { children } = &node.kind else {
            return Err(FsError::NotDirectory);
        };

        let mut entries = vec![
            DirEntry {
                ino,
                name: ".".to_string(),
                kind: EntryKind::Directory,
            },
            DirEntry {
                ino: node.parent,
                name: "..".to_string(),
                kind: EntryKind::Directory,
            },
        ];
        for (name, &child) in children {
            let kind = match self.node(child).map(|n| &n.kind) {
                Some(NodeKind::Directory { .. }) => EntryKind::Directory,
                _ => EntryKind::File,
            };
            entries.push(DirEntry {
                ino: child,
                name: name.clone(),
                kind,
            });
        }
        Ok(entries)
    }

    /// Resolves an inode to `(file_index, size)` for a read.
    ///
    /// # Errors
    /// - [`FsError::NotFound`] - unknown inode
    /// - [`FsError::IsDirectory`] - the inode names a directory
    pub fn file_at(&self, ino: u64) -> Result<(usize, u64), FsError> {
        match self.node(ino).ok_or(FsError::NotFound)?.kind {
            NodeKind::File { size, file_index } => Ok((file_index, size)),
            NodeKind::Directory { .. } => Err(FsError::IsDirectory),
        }
    }
}

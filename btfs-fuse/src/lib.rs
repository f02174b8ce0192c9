//! FUSE adapter for btfs.
//!
//! A thin translation layer: kernel requests arrive via the `fuser` crate,
//! get forwarded to the [`PieceReactor`], and errors map to errnos. The
//! filesystem is strictly read-only; everything outside `lookup`, `getattr`,
//! `opendir`, `readdir`, `open` and `read` stays on fuser's default ENOSYS
//! implementations.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use btfs_core::fs::{EntryAttr, EntryKind};
use btfs_core::{FsError, PieceReactor, Session};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEntry, ReplyOpen, Request,
};
use thiserror::Error;
use tracing::{info, warn};

/// TTL for cached attributes and entries. Entries appear when metadata
/// arrives and never change afterwards, so a short TTL only matters around
/// that one transition.
const ATTR_TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 512;

#[derive(Debug, Error)]
pub enum FuseError {
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),
    #[error("mount i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mount-time options.
#[derive(Debug, Clone)]
pub struct MountOptions {
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            allow_other: false,
            auto_unmount: true,
        }
    }
}

fn errno_of(err: FsError) -> c_int {
    match err {
        FsError::NotFound => libc::ENOENT,
        FsError::NotDirectory => libc::ENOTDIR,
        FsError::IsDirectory => libc::EISDIR,
        FsError::AccessDenied => libc::EACCES,
        FsError::ShuttingDown => libc::EIO,
    }
}

/// Whether open flags request plain read-only access.
fn is_read_only(flags: i32) -> bool {
    flags & libc::O_ACCMODE == libc::O_RDONLY
}

/// Cached uid/gid so attribute replies avoid repeated syscalls.
#[derive(Debug, Clone, Copy)]
struct UidGid {
    uid: u32,
    gid: u32,
}

impl UidGid {
    fn current() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

fn to_file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
    }
}

fn to_file_attr(entry: &EntryAttr, ids: UidGid) -> FileAttr {
    let (perm, nlink) = match entry.kind {
        EntryKind::Directory => (0o755, 2),
        EntryKind::File => (0o444, 1),
    };
    FileAttr {
        ino: entry.ino,
        size: entry.size,
        blocks: entry.size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: SystemTime::UNIX_EPOCH,
        mtime: SystemTime::UNIX_EPOCH,
        ctime: SystemTime::UNIX_EPOCH,
        crtime: SystemTime::UNIX_EPOCH,
        kind: to_file_type(entry.kind),
        perm,
        nlink,
        uid: ids.uid,
        gid: ids.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// FUSE filesystem over a torrent session.
///
/// Owns the [`Session`] for the lifetime of the mount; `destroy` runs the
/// fast teardown.
pub struct TorrentFuse {
    reactor: Arc<PieceReactor>,
    session: Option<Session>,
    ids: UidGid,
}

impl TorrentFuse {
    pub fn new(session: Session) -> Self {
        Self {
            reactor: session.reactor(),
            session: Some(session),
            ids: UidGid::current(),
        }
    }
}

impl Filesystem for TorrentFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("filesystem mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
        info!("filesystem unmounted");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.reactor.lookup(parent, name) {
            Ok(entry) => reply.entry(&ATTR_TTL, &to_file_attr(&entry, self.ids), 0),
            Err(e) => reply.error(errno_of(e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.reactor.getattr(ino) {
            Ok(entry) => reply.attr(&ATTR_TTL, &to_file_attr(&entry, self.ids)),
            Err(e) => reply.error(errno_of(e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        // Stateless; readdir re-validates the inode.
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.reactor.readdir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno_of(e));
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (position, entry) in entries.iter().enumerate().skip(skip) {
            let full = reply.add(
                entry.ino,
                (position + 1) as i64,
                to_file_type(entry.kind),
                OsStr::new(&entry.name),
            );
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if let Err(e) = self.reactor.open(ino) {
            reply.error(errno_of(e));
            return;
        }
        if !is_read_only(flags) {
            reply.error(libc::EACCES);
            return;
        }
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.reactor.read(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!(ino, offset, size, error = %e, "read failed");
                reply.error(errno_of(e));
            }
        }
    }
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("btfs".to_owned()),
        MountOption::Subtype("btfs".to_owned()),
        MountOption::RO,
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
    ];
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

/// Mounts the filesystem and blocks until it is unmounted.
///
/// # Errors
/// - [`FuseError::InvalidMountpoint`] - empty mountpoint
/// - [`FuseError::Io`] - the kernel mount failed
pub fn mount(
    fs: TorrentFuse,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<(), FuseError> {
    let mountpoint = mountpoint.as_ref();
    if mountpoint.as_os_str().is_empty() {
        return Err(FuseError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    let fuse_opts = build_mount_options(options);
    fuser::mount2(fs, mountpoint, &fuse_opts)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(errno_of(FsError::NotFound), libc::ENOENT);
        assert_eq!(errno_of(FsError::NotDirectory), libc::ENOTDIR);
        assert_eq!(errno_of(FsError::IsDirectory), libc::EISDIR);
        assert_eq!(errno_of(FsError::AccessDenied), libc::EACCES);
        assert_eq!(errno_of(FsError::ShuttingDown), libc::EIO);
    }

    #[test]
    fn test_open_flag_check() {
        assert!(is_read_only(libc::O_RDONLY));
        assert!(is_read_only(libc::O_RDONLY | libc::O_NONBLOCK));
        assert!(!is_read_only(libc::O_WRONLY));
        assert!(!is_read_only(libc::O_RDWR));
    }

    #[test]
    fn test_attr_conversion() {
        let ids = UidGid { uid: 1000, gid: 1000 };

        let dir = EntryAttr {
            ino: 1,
            kind: EntryKind::Directory,
            size: 0,
        };
        let attr = to_file_attr(&dir, ids);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);

        let file = EntryAttr {
            ino: 2,
            kind: EntryKind::File,
            size: 1025,
        };
        let attr = to_file_attr(&file, ids);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o444);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 1025);
        assert_eq!(attr.blocks, 3);
        assert_eq!(attr.uid, 1000);
    }

    #[test]
    fn test_mount_options_read_only() {
        let opts = build_mount_options(&MountOptions::default());
        assert!(opts.iter().any(|o| matches!(o, MountOption::RO)));
        assert!(opts.iter().any(|o| matches!(o, MountOption::AutoUnmount)));
        assert!(!opts.iter().any(|o| matches!(o, MountOption::AllowOther)));

        let opts = build_mount_options(&MountOptions {
            allow_other: true,
            auto_unmount: false,
        });
        assert!(opts.iter().any(|o| matches!(o, MountOption::AllowOther)));
        assert!(!opts.iter().any(|o| matches!(o, MountOption::AutoUnmount)));
    }
}

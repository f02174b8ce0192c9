//! btfs — mount a BitTorrent swarm as a read-only on-demand filesystem.
//!
//! `btfs [options] <metadata> <mountpoint>` where `<metadata>` is a
//! `.torrent` file or a `magnet:` URI. Files appear under the mountpoint as
//! soon as metadata is known; reads block until the relevant pieces arrive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use btfs_core::config::DEFAULT_RATE_LIMIT;
use btfs_core::engine::sim::{SimContent, SimulationEngine};
use btfs_core::torrent::metainfo;
use btfs_core::tracing_setup::init_tracing;
use btfs_core::{BtfsConfig, MagnetLink, Session, TorrentSource};

#[derive(Parser)]
#[command(name = "btfs", version)]
#[command(about = "Mount a BitTorrent swarm as a read-only filesystem")]
struct Cli {
    /// Path to a .torrent file, or a magnet: URI
    metadata: String,

    /// Directory to mount the torrent at
    mountpoint: PathBuf,

    /// Parent directory for staged pieces (default: $HOME/btfs, or
    /// /tmp/btfs when HOME is unset)
    #[arg(long)]
    target: Option<PathBuf>,

    /// Download rate limit in bytes per second (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT)]
    download_rate: u64,

    /// Upload rate limit in bytes per second (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT)]
    upload_rate: u64,

    /// Serve pieces from a local seed copy of the content (development
    /// backend; without it, pieces already staged under the save path are
    /// the only source)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Console log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let source = resolve_metadata(&cli.metadata)?;
    let save_path = resolve_target(cli.target.as_deref())?;

    let mut config = BtfsConfig::default();
    config.engine.download_limit = cli.download_rate;
    config.engine.upload_limit = cli.upload_rate;

    // The swarm side is pluggable; the bundled engine serves pieces from a
    // local seed copy (or whatever is already staged under the save path).
    let seed_dir = cli.seed.clone().unwrap_or_else(|| save_path.clone());
    let engine = Arc::new(SimulationEngine::new(SimContent::SeedDir(seed_dir)));

    let session = Session::start(engine, config, source, &save_path)
        .context("failed to start torrent session")?;

    let options = btfs_fuse::MountOptions {
        allow_other: cli.allow_other,
        ..Default::default()
    };
    btfs_fuse::mount(
        btfs_fuse::TorrentFuse::new(session),
        &cli.mountpoint,
        &options,
    )
    .context("mount failed")?;

    Ok(())
}

/// Classifies the metadata argument. HTTP(S) fetching is not supported.
fn resolve_metadata(arg: &str) -> anyhow::Result<TorrentSource> {
    if arg.starts_with("http:") || arg.starts_with("https:") {
        bail!("no HTTP or HTTPS support; pass a .torrent file or magnet URI");
    }
    if arg.starts_with("magnet:") {
        let link = MagnetLink::parse(arg).context("can't load magnet")?;
        return Ok(TorrentSource::Magnet(link));
    }
    let metadata = metainfo::load_shared(Path::new(arg)).context("can't load metadata")?;
    Ok(TorrentSource::Metainfo(metadata))
}

/// Creates the save path: `<parent>/btfs-XXXXXX`, where the parent is the
/// `--target` override, `$HOME/btfs`, or `/tmp/btfs`. The parent is created
/// mode 0755 and tolerated if it already exists; the unique subdirectory is
/// kept for the engine to stage pieces in.
fn resolve_target(target: Option<&Path>) -> anyhow::Result<PathBuf> {
    let parent = match target {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join("btfs"),
            None => PathBuf::from("/tmp/btfs"),
        },
    };

    create_parent(&parent)
        .with_context(|| format!("failed to create target {}", parent.display()))?;

    let dir = tempfile::Builder::new()
        .prefix("btfs-")
        .tempdir_in(&parent)
        .context("failed to generate target")?;
    Ok(dir.keep())
}

#[cfg(unix)]
fn create_parent(parent: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::DirBuilder::new().mode(0o755).create(parent) {
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_metadata_rejected() {
        assert!(resolve_metadata("http://example.com/f.torrent").is_err());
        assert!(resolve_metadata("https://example.com/f.torrent").is_err());
    }

    #[test]
    fn test_magnet_metadata_parsed() {
        let source =
            resolve_metadata("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567")
                .unwrap();
        assert!(matches!(source, TorrentSource::Magnet(_)));
        assert!(resolve_metadata("magnet:?dn=NoHash").is_err());
    }

    #[test]
    fn test_missing_torrent_file_rejected() {
        assert!(resolve_metadata("/nonexistent/file.torrent").is_err());
    }

    #[test]
    fn test_resolve_target_creates_unique_dirs() {
        let base = tempfile::tempdir().unwrap();
        let parent = base.path().join("staging");

        let first = resolve_target(Some(&parent)).unwrap();
        let second = resolve_target(Some(&parent)).unwrap();

        assert!(first.is_dir());
        assert!(second.is_dir());
        assert_ne!(first, second);
        assert!(first
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("btfs-"));
        assert_eq!(first.parent().unwrap(), parent);

        // Re-using an existing parent is fine.
        assert!(resolve_target(Some(&parent)).is_ok());
    }

    #[test]
    fn test_cli_parses_positional_arguments() {
        let cli = Cli::try_parse_from(["btfs", "file.torrent", "/mnt/t"]).unwrap();
        assert_eq!(cli.metadata, "file.torrent");
        assert_eq!(cli.mountpoint, PathBuf::from("/mnt/t"));
        assert_eq!(cli.download_rate, DEFAULT_RATE_LIMIT);
        assert!(!cli.allow_other);

        assert!(Cli::try_parse_from(["btfs", "file.torrent"]).is_err());
    }
}

//! Tracing setup for btfs.
//!
//! Logs go to stderr so they never interleave with anything the mounted
//! filesystem's consumers read. `BTFS_LOG` overrides the console level with
//! a full `EnvFilter` directive.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// `console_level` is the default level; the `BTFS_LOG` environment variable
/// takes precedence when set. Calling this twice is a no-op.
pub fn init_tracing(console_level: Level) {
    let filter = EnvFilter::try_from_env("BTFS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

//! Centralized configuration for btfs.
//!
//! All tunable parameters live here so the rest of the codebase carries no
//! scattered magic numbers.

/// Default up/download rate limit: 5 Mbit/s expressed in bytes per second.
pub const DEFAULT_RATE_LIMIT: u64 = 5 * 1024 * 1024 / 8;

/// Central configuration for all btfs components.
#[derive(Debug, Clone, Default)]
pub struct BtfsConfig {
    pub engine: EngineConfig,
    pub window: WindowConfig,
}

/// Swarm engine configuration, applied when the session starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Inclusive TCP listen port range offered to the engine.
    pub listen_port_range: (u16, u16),
    /// Download rate limit in bytes per second.
    pub download_limit: u64,
    /// Upload rate limit in bytes per second.
    pub upload_limit: u64,
    /// Whether the engine may duplicate requests near completion.
    pub strict_end_game_mode: bool,
    /// Announce to every tracker, not just the first reachable one.
    pub announce_to_all_trackers: bool,
    /// Announce to every tracker tier.
    pub announce_to_all_tiers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_port_range: (6881, 6889),
            download_limit: DEFAULT_RATE_LIMIT,
            upload_limit: DEFAULT_RATE_LIMIT,
            strict_end_game_mode: false,
            announce_to_all_trackers: true,
            announce_to_all_tiers: true,
        }
    }
}

/// Sliding-window scheduler configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Bytes of missing pieces held at high priority ahead of the cursor.
    pub head_bytes: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            head_bytes: 2 * 1024 * 1024, // 2 MiB
        }
    }
}

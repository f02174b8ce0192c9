//! Session façade over the swarm engine.
//!
//! Owns the engine handle and the single alert-pump thread. The pump turns
//! the engine's alert stream into reactor calls; when metadata shows up it
//! runs one-time setup: install the directory index and layout, apply the
//! rate limits, and zero every file priority so nothing downloads until a
//! read asks for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, trace, warn};

use crate::config::BtfsConfig;
use crate::engine::{Alert, EngineError, TorrentEngine, TorrentSource};
use crate::fs::PieceReactor;
use crate::torrent::PiecePriority;

/// A mounted-torrent session: engine, reactor and alert pump.
pub struct Session {
    reactor: Arc<PieceReactor>,
    pump: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Session {
    /// Configures the engine, starts the alert pump and enqueues the
    /// torrent asynchronously. Metadata may arrive any time later; until it
    /// does, the filesystem shows an empty root.
    ///
    /// # Errors
    /// - [`EngineError`] - the pump thread cannot be spawned or the engine
    ///   rejects the torrent
    pub fn start(
        engine: Arc<dyn TorrentEngine>,
        config: BtfsConfig,
        source: TorrentSource,
        save_path: &std::path::Path,
    ) -> Result<Self, EngineError> {
        engine.apply_settings(&config.engine);

        let reactor = PieceReactor::new(Arc::clone(&engine), config.window.head_bytes);
        let stop = Arc::new(AtomicBool::new(false));

        let pump = {
            let reactor = Arc::clone(&reactor);
            let alerts = engine.alerts();
            let stop = Arc::clone(&stop);
            let config = config.clone();
            std::thread::Builder::new()
                .name("btfs-alerts".to_string())
                .spawn(move || pump_loop(&reactor, &alerts, &config, &stop))?
        };

        info!(save_path = %save_path.display(), "adding torrent");
        engine.add_torrent(source, save_path)?;

        Ok(Self {
            reactor,
            pump: Some(pump),
            stop,
        })
    }

    /// The shared reactor, for wiring into the mount layer.
    pub fn reactor(&self) -> Arc<PieceReactor> {
        Arc::clone(&self.reactor)
    }

    /// Fast teardown: wake every blocked read, then stop and join the pump.
    ///
    /// The engine is deliberately leaked afterwards. Engine destructors do
    /// tracker announces and graceful peer shutdown, which can take seconds;
    /// the OS reclaims the sockets on exit and we can live without the
    /// goodbyes.
    pub fn shutdown(mut self) {
        debug!("session teardown");
        self.reactor.begin_shutdown();
        self.stop.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }

        std::mem::forget(self.reactor());
        std::mem::forget(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

fn pump_loop(
    reactor: &PieceReactor,
    alerts: &Receiver<Alert>,
    config: &BtfsConfig,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Acquire) {
        match alerts.recv_timeout(Duration::from_secs(1)) {
            Ok(alert) => dispatch(reactor, config, alert),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("alert stream closed");
                break;
            }
        }
    }
}

fn dispatch(reactor: &PieceReactor, config: &BtfsConfig, alert: Alert) {
    match alert {
        Alert::ReadPiece { piece, data } => reactor.handle_read_piece(piece, &data),
        Alert::PieceFinished { piece } => reactor.handle_piece_finished(piece),
        Alert::TorrentAdded { has_metadata } => {
            debug!(has_metadata, "torrent added");
            if has_metadata {
                setup(reactor, config);
            }
        }
        Alert::MetadataReceived => setup(reactor, config),
        Alert::MetadataFailed => {
            trace!("metadata attempt failed; engine keeps trying");
        }
        Alert::Other => {}
    }
}

/// One-time setup once metadata is known.
fn setup(reactor: &PieceReactor, config: &BtfsConfig) {
    if reactor.is_ready() {
        return;
    }
    let engine = reactor.engine();
    let Some(metadata) = engine.metadata() else {
        warn!("metadata alert without metadata snapshot");
        return;
    };

    engine.set_download_limit(config.engine.download_limit);
    engine.set_upload_limit(config.engine.upload_limit);

    // Nothing downloads by default; reads pull bytes in through the window.
    for file_index in 0..metadata.files.len() {
        engine.file_priority(file_index, PiecePriority::Skip);
    }

    reactor.install_metadata(&metadata);
}

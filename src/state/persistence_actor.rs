//! Persistence Actor for debounced preset snapshots
//!
//! Stores [`PresetSnapshot`] as a JSON file with a configurable debounce
//! window, so a full stored-bank sync (up to 100 bulk dumps in a burst)
//! results in a single write.
//!
//! # Debouncing Strategy
//!
//! 1. A save request replaces the latest snapshot in a slot shared with the
//!    actor, then nudges the actor through its queue.
//! 2. Further requests inside the window replace it again (last-write-wins).
//!    A nudge lost to a full queue loses nothing, the slot still holds the
//!    newest snapshot.
//! 3. Once the window expires without new requests, the pending snapshot is
//!    written to disk.
//!
//! # Example
//!
//! ```ignore
//! use m300_gw::state::persistence_actor::PersistenceActor;
//!
//! let handle = PersistenceActor::spawn("./data/presets.json", 500);
//! handle.request_save(snapshot);
//! handle.flush().await?;
//! handle.shutdown();
//! ```

use super::persistence::PresetSnapshot;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, trace, warn};

/// Default debounce window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Commands sent to the persistence actor
#[derive(Debug)]
pub enum PersistenceCommand {
    /// A new snapshot is waiting in the shared slot (debounced)
    Save,
    /// Force flush any pending snapshot
    Flush(oneshot::Sender<Result<()>>),
    /// Shutdown the actor
    Shutdown,
}

/// Persistence actor that manages debounced writes to the preset file
pub struct PersistenceActor {
    path: PathBuf,
    command_rx: mpsc::Receiver<PersistenceCommand>,
    /// Newest snapshot handed over by [`PersistenceActorHandle::request_save`]
    latest: Arc<Mutex<Option<PresetSnapshot>>>,
    /// Pending snapshot awaiting flush
    pending_snapshot: Option<PresetSnapshot>,
    /// Timestamp of last save request
    last_write_ts: Instant,
    debounce_ms: u64,
    /// Total number of writes performed
    write_count: u64,
}

/// Handle to communicate with the persistence actor
///
/// Cheap to clone and can be shared across tasks.
#[derive(Clone)]
pub struct PersistenceActorHandle {
    cmd_tx: mpsc::Sender<PersistenceCommand>,
    latest: Arc<Mutex<Option<PresetSnapshot>>>,
}

impl PersistenceActor {
    /// Spawn a new persistence actor writing to `path`
    ///
    /// A `debounce_ms` of 0 writes every request immediately.
    pub fn spawn(path: impl Into<PathBuf>, debounce_ms: u64) -> PersistenceActorHandle {
        let path = path.into();
        info!("Persistence actor writing presets to: {}", path.display());

        let (cmd_tx, command_rx) = mpsc::channel(100);
        let latest = Arc::new(Mutex::new(None));

        let actor = PersistenceActor {
            path,
            command_rx,
            latest: latest.clone(),
            pending_snapshot: None,
            last_write_ts: Instant::now(),
            debounce_ms,
            write_count: 0,
        };

        tokio::spawn(actor.run());

        PersistenceActorHandle { cmd_tx, latest }
    }

    async fn run(mut self) {
        info!("Persistence actor started (debounce: {}ms)", self.debounce_ms);

        let tick_interval = if self.debounce_ms > 0 {
            self.debounce_ms
        } else {
            1000
        };
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_interval));

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PersistenceCommand::Save) => {
                            trace!("Received save command, queuing snapshot");
                            self.take_latest();

                            if self.debounce_ms == 0 {
                                let _ = self.flush_pending_snapshot().await;
                            }
                        }
                        Some(PersistenceCommand::Flush(response_tx)) => {
                            trace!("Received flush command");
                            self.take_latest();
                            let result = self.flush_pending_snapshot().await;
                            let _ = response_tx.send(result);
                        }
                        Some(PersistenceCommand::Shutdown) | None => {
                            info!("Persistence actor shutting down, flushing pending snapshot");
                            self.take_latest();
                            let _ = self.flush_pending_snapshot().await;
                            info!(
                                "Persistence actor shutdown complete (total writes: {})",
                                self.write_count
                            );
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.take_latest();
                    if self.pending_snapshot.is_some() && self.debounce_ms > 0 {
                        let elapsed = self.last_write_ts.elapsed();
                        if elapsed >= Duration::from_millis(self.debounce_ms) {
                            trace!(
                                "Debounce window expired ({:?}), flushing pending snapshot",
                                elapsed
                            );
                            let _ = self.flush_pending_snapshot().await;
                        }
                    }
                }
            }
        }
    }

    /// Move a freshly requested snapshot into the pending slot
    fn take_latest(&mut self) {
        if let Some(snapshot) = self.latest.lock().take() {
            self.pending_snapshot = Some(snapshot);
            self.last_write_ts = Instant::now();
        }
    }

    /// Write the pending snapshot, if any
    ///
    /// A failed write is logged and returned; the next save provides fresh data.
    async fn flush_pending_snapshot(&mut self) -> Result<()> {
        let Some(snapshot) = self.pending_snapshot.take() else {
            trace!("No pending snapshot to flush");
            return Ok(());
        };

        match snapshot.save_to_file(&self.path).await {
            Ok(()) => {
                self.write_count += 1;
                trace!("Presets written to disk (write #{})", self.write_count);
                Ok(())
            }
            Err(e) => {
                error!("Failed to write presets to {}: {:#}", self.path.display(), e);
                Err(e)
            }
        }
    }
}

impl PersistenceActorHandle {
    /// Request saving a snapshot without waiting
    ///
    /// Used from the engine loop, which must never block on disk I/O. The
    /// newest snapshot always reaches disk, even when the queue is full.
    pub fn request_save(&self, snapshot: PresetSnapshot) {
        *self.latest.lock() = Some(snapshot);
        match self.cmd_tx.try_send(PersistenceCommand::Save) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Persistence queue full, snapshot picked up on next tick");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Preset save request dropped: persistence actor shut down");
            }
        }
    }

    /// Force flush any pending snapshot to disk immediately
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PersistenceCommand::Flush(tx))
            .await
            .context("Failed to send flush command: actor shut down")?;

        rx.await.context("Failed to receive flush response")?
    }

    /// Signal the actor to shut down
    ///
    /// Fire-and-forget; the actor flushes any pending snapshot first.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(PersistenceCommand::Shutdown);
    }
}

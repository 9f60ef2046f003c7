//! Persistence of converted audio and background cleanup.
//!
//! Every converted response is written to disk as a timestamped artifact
//! (`transformed_YYYYMMDD_HHMMSS.<ext>`). The janitor task sweeps the
//! directory periodically and removes artifacts past their retention age,
//! so a long-lived session does not accumulate unbounded disk usage.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Prefix shared by every persisted artifact; the janitor only ever touches
/// files carrying it.
const ARTIFACT_PREFIX: &str = "transformed_";

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Artifacts older than this are removed on the next sweep.
const RETENTION: Duration = Duration::from_secs(600);

/// Writes converted audio artifacts into a fixed directory.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    /// Open the store, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one artifact and return its path.
    pub fn save(&self, bytes: &[u8], extension: &str) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("{ARTIFACT_PREFIX}{stamp}.{extension}"));
        std::fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact saved");
        Ok(path)
    }

    /// Write an artifact on a detached thread so disk latency never stalls
    /// playback. Failures are logged, not propagated.
    pub fn save_detached(&self, bytes: Vec<u8>, extension: &str) -> JoinHandle<()> {
        let store = self.clone();
        let extension = extension.to_owned();
        std::thread::spawn(move || {
            if let Err(e) = store.save(&bytes, &extension) {
                warn!("failed to persist converted audio: {e}");
            }
        })
    }
}

/// Background task removing expired artifacts from a store directory.
pub struct Janitor {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Janitor {
    /// Start sweeping `dir` every minute.
    pub fn start(dir: PathBuf) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            // First tick fires immediately; skip it so startup stays quiet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = tokio::task::spawn_blocking({
                            let dir = dir.clone();
                            move || sweep_once(&dir, RETENTION)
                        })
                        .await;
                        match swept {
                            Ok(Ok(removed)) if removed > 0 => {
                                info!(removed, "swept expired artifacts");
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!("artifact sweep failed: {e}"),
                            Err(e) => warn!("artifact sweep task failed: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("janitor shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx, task }
    }

    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Remove artifacts in `dir` older than `retention`. Returns how many were
/// removed. Only files carrying the artifact prefix are considered; anything
/// else in the directory is left alone.
pub fn sweep_once(dir: &Path, retention: Duration) -> Result<usize> {
    let mut removed = 0usize;
    let now = SystemTime::now();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(ARTIFACT_PREFIX) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified = match meta.modified() {
            Ok(t) => t,
            Err(_) => continue,
        };
        let age = match now.duration_since(modified) {
            Ok(age) => age,
            // Clock skew: treat future timestamps as fresh.
            Err(_) => continue,
        };

        if age > retention {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = name, "failed to remove expired artifact: {e}"),
            }
        }
    }

    Ok(removed)
}

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::Result;
use blob_store::BlobStorage;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::GcConfig;

/// Removes staging files left behind by writes that never committed, e.g.
/// when the process died mid-upload. Committed blobs are never touched.
pub struct StagingSweeper {
    storage: Arc<BlobStorage>,
    staging_ttl: Duration,
    interval: Duration,
    shutdown_rx: watch::Receiver<()>,
}

impl StagingSweeper {
    pub fn new(
        storage: Arc<BlobStorage>,
        config: &GcConfig,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            storage,
            staging_ttl: Duration::from_secs(config.staging_ttl_secs),
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            shutdown_rx,
        }
    }

    pub async fn start(&mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!("staging sweep failed: {:?}", err);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("staging sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// Deletes staging files older than the TTL. Returns how many were removed.
    pub async fn sweep(&self) -> Result<usize> {
        let root = self.storage.root();
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            return Ok(0);
        }
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_staging_file(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.staging_ttl {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(file = %name, "removed stale staging file");
                    removed += 1;
                }
                // Committed or aborted by its writer in the meantime.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            info!(removed, "swept stale staging files");
        }
        Ok(removed)
    }
}

// Staging files are named `{storage_name}#{n}`; storage names never contain '#'.
fn is_staging_file(name: &str) -> bool {
    name.rsplit_once('#')
        .is_some_and(|(_, suffix)| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
}

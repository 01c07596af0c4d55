use std::{
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::{local::LocalFileSystem, path::Path, ObjectStore, WriteMultipart};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

pub mod naming;

use naming::StorageName;

/// URL prefix under which every stored blob is served.
pub const STATIC_MOUNT: &str = "/documents";

const MAX_ALLOCATION_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub path: String,
    /// Re-roll a storage name when it already exists in the store.
    #[serde(default)]
    pub check_collisions: bool,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: path.to_string(),
            check_collisions: false,
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        BlobStorageConfig::new("public/documents")
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub storage_name: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub storage_name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// A flat directory of uploaded files.
///
/// The root directory is created on demand before each write, so a root that
/// disappears between requests is recreated by the next upload. Writes go to
/// a staging file and are committed by rename, so readers never observe a
/// partially written blob under its storage name.
#[derive(Clone)]
pub struct BlobStorage {
    root: PathBuf,
    check_collisions: bool,
    object_store: Arc<OnceCell<Arc<LocalFileSystem>>>,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Self {
        Self {
            root: PathBuf::from(config.path),
            check_collisions: config.check_collisions,
            object_store: Arc::new(OnceCell::new()),
        }
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<Arc<LocalFileSystem>> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&self.root)
                .await
                .with_context(|| format!("unable to create blob root {}", self.root.display()))?;
            info!(root = %self.root.display(), "created blob store root");
        }
        self.object_store().await
    }

    async fn object_store(&self) -> Result<Arc<LocalFileSystem>> {
        let store = self
            .object_store
            .get_or_try_init(|| async {
                LocalFileSystem::new_with_prefix(&self.root)
                    .map(Arc::new)
                    .with_context(|| {
                        format!("unable to open blob root {}", self.root.display())
                    })
            })
            .await?;
        Ok(store.clone())
    }

    // Read paths never create the root; a missing root is an empty store.
    async fn existing_store(&self) -> Result<Option<Arc<LocalFileSystem>>> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(self.object_store().await?))
    }

    /// Allocates a storage name for `original_name`, re-rolling on collision
    /// when the store is configured to check.
    pub async fn allocate(&self, original_name: &str) -> Result<StorageName> {
        if !self.check_collisions {
            return Ok(naming::allocate(
                original_name,
                now_millis(),
                &mut rand::rng(),
            )?);
        }
        self.allocate_unique(original_name).await
    }

    pub async fn allocate_unique(&self, original_name: &str) -> Result<StorageName> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = naming::allocate(original_name, now_millis(), &mut rand::rng())?;
            if !self.exists(candidate.as_str()).await? {
                return Ok(candidate);
            }
            debug!(storage_name = %candidate, "storage name collision, retrying");
        }
        Err(anyhow!(
            "unable to allocate a free storage name for {:?} after {} attempts",
            original_name,
            MAX_ALLOCATION_ATTEMPTS
        ))
    }

    pub fn public_url(&self, public_base: &str, storage_name: &str) -> String {
        format!(
            "{}{}/{}",
            public_base.trim_end_matches('/'),
            STATIC_MOUNT,
            storage_name
        )
    }

    /// Streams `data` into `root/storage_name`.
    ///
    /// An error from `data` aborts the staged write and is returned unchanged,
    /// so callers can downcast their own stream errors.
    pub async fn put(
        &self,
        storage_name: &str,
        mut data: impl futures::Stream<Item = Result<Bytes>> + Send + Unpin,
    ) -> Result<PutResult> {
        let store = self.ensure_root().await?;
        let path = Path::from(storage_name);
        let upload = store.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut hasher = Sha256::new();
        let mut size_bytes = 0;
        while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    abort_write(writer, storage_name).await;
                    return Err(err);
                }
            };
            if let Err(err) = writer.wait_for_capacity(1).await {
                abort_write(writer, storage_name).await;
                return Err(err.into());
            }
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer
            .finish()
            .await
            .with_context(|| format!("unable to commit blob {}", storage_name))?;

        let hash = format!("{:x}", hasher.finalize());
        debug!(storage_name, size_bytes, sha256 = %hash, "blob written");
        Ok(PutResult {
            storage_name: storage_name.to_string(),
            size_bytes,
            sha256_hash: hash,
        })
    }

    pub async fn exists(&self, storage_name: &str) -> Result<bool> {
        let Some(store) = self.existing_store().await? else {
            return Ok(false);
        };
        match store.head(&Path::from(storage_name)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Committed blobs in the store, ordered by storage name. Staging files
    /// of in-flight writes are not reported.
    pub async fn list(&self) -> Result<Vec<StoredBlob>> {
        let Some(store) = self.existing_store().await? else {
            return Ok(Vec::new());
        };
        let mut blobs: Vec<StoredBlob> = store
            .list(None)
            .map_ok(|meta| StoredBlob {
                storage_name: meta.location.to_string(),
                size_bytes: meta.size as u64,
                modified_at: meta.last_modified,
            })
            .try_collect()
            .await?;
        blobs.sort_by(|a, b| a.storage_name.cmp(&b.storage_name));
        Ok(blobs)
    }

    /// Removes a blob. Returns `false` when nothing was stored under the name.
    pub async fn delete(&self, storage_name: &str) -> Result<bool> {
        let Some(store) = self.existing_store().await? else {
            return Ok(false);
        };
        match store.delete(&Path::from(storage_name)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn abort_write(writer: WriteMultipart, storage_name: &str) {
    if let Err(err) = writer.abort().await {
        error!(storage_name, ?err, "failed to abort staged blob write");
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis() as u64
}

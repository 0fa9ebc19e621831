//! Generation-ordered JSON document with atomic replace

use crate::io::error::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// A serialized snapshot holding its place in the write order.
#[derive(Debug)]
pub struct StagedWrite {
    generation: u64,
    bytes: Vec<u8>,
}

impl StagedWrite {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// One JSON document at a fixed path.
///
/// Mutations happen in memory elsewhere; the owner hands a snapshot to
/// [`JsonStore::save`] (awaited) or [`JsonStore::spawn_save`] (background)
/// after every logical change, or stages it with [`JsonStore::stage`] under
/// its own lock.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    /// Next generation number to hand out.
    issued: AtomicU64,
    /// Highest generation that has landed on disk.
    landed: tokio::sync::Mutex<u64>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            issued: AtomicU64::new(0),
            landed: tokio::sync::Mutex::new(0),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, falling back to `T::default()`.
    ///
    /// A missing file is the normal first-run case and is silent. A file that
    /// exists but cannot be read or parsed is logged and replaced by the
    /// default on the next save.
    pub fn load(&self) -> T {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state document");
                return T::default();
            }
        };
        match serde_json::from_slice(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "state document is corrupt, starting empty"
                );
                T::default()
            }
        }
    }

    /// Serialize `value` and write it, awaiting completion.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when serialization or any filesystem step fails.
    pub async fn save(&self, value: &T) -> Result<(), StoreError> {
        let staged = self.stage(value)?;
        self.write(staged).await.map(|_| ())
    }

    /// Number and serialize a snapshot without touching the disk.
    ///
    /// Generations follow the order of `stage` calls, so an owner that shares
    /// the document between threads stages while still holding the lock that
    /// guards it. The write itself can then happen after the lock is gone.
    pub fn stage(&self, value: &T) -> Result<StagedWrite, StoreError> {
        let bytes = self.encode(value)?;
        Ok(StagedWrite {
            generation: self.issue(),
            bytes,
        })
    }

    /// Land a staged snapshot. Returns `Ok(false)` when a newer generation
    /// already landed and this one was dropped.
    pub async fn write(&self, staged: StagedWrite) -> Result<bool, StoreError> {
        self.write_generation(staged.generation, staged.bytes).await
    }

    /// Serialize `value` now and write it from a background task.
    pub fn spawn_save(self: &Arc<Self>, value: &T)
    where
        T: 'static,
    {
        match self.stage(value) {
            Ok(staged) => self.spawn_write(staged),
            Err(e) => warn!(error = %e, "failed to encode state document"),
        }
    }

    /// Write a staged snapshot from a background task.
    ///
    /// Failures are reduced to a `warn!`. Outside a tokio runtime the write
    /// runs inline on the calling thread.
    pub fn spawn_write(self: &Arc<Self>, staged: StagedWrite)
    where
        T: 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = store.write(staged).await {
                        warn!(error = %e, "background state flush failed");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self.write_generation_blocking(staged.generation, &staged.bytes) {
                    warn!(error = %e, "state flush failed");
                }
            }
        }
    }

    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn tmp_path(&self, generation: u64) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        self.path.with_file_name(format!(".{name}.{generation}.tmp"))
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns `Ok(false)` when a newer generation already landed.
    async fn write_generation(&self, generation: u64, bytes: Vec<u8>) -> Result<bool, StoreError> {
        let mut landed = self.landed.lock().await;
        if generation < *landed {
            debug!(path = %self.path.display(), generation, "skipping superseded state flush");
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(parent, e))?;
        }
        let tmp = self.tmp_path(generation);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| self.io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_err(&self.path, e));
        }

        *landed = generation;
        Ok(true)
    }

    fn write_generation_blocking(&self, generation: u64, bytes: &[u8]) -> Result<bool, StoreError> {
        let mut landed = self.landed.blocking_lock();
        if generation < *landed {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(parent, e))?;
        }
        let tmp = self.tmp_path(generation);
        std::fs::write(&tmp, bytes).map_err(|e| self.io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.io_err(&self.path, e));
        }

        *landed = generation;
        Ok(true)
    }
}

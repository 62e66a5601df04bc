use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::Store;
use crate::models::{ConsumeResult, Paste};

const EXTENSION: &str = "json";

/// One JSON document per paste inside a directory.
///
/// Every read-modify-write of a record happens while holding that id's lock,
/// so concurrent viewers of the same paste are serialized and viewers of
/// different pastes are not.
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub async fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir: PathBuf = dir.into();

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let metadata = fs::metadata(&dir)
            .await
            .with_context(|| format!("failed to inspect {}", dir.display()))?;
        if !metadata.is_dir() {
            bail!("{} is not a directory", dir.display());
        }

        Ok(FileStore {
            dir,
            locks: Arc::default(),
        })
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_owned()).or_default().clone()
    }

    /// Drop the lock of an id nobody else is waiting on.
    fn forget_lock(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn read(&self, id: &str) -> crate::AppResult<Option<Paste>> {
        match fs::read(self.path(id)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write through a temporary file so readers never see a partial record.
    async fn write(&self, paste: &Paste) -> crate::AppResult<()> {
        let path = self.path(&paste.id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&tmp, serde_json::to_vec(paste)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Ids become file names, so only accept the characters generated ids use.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl Store for FileStore {
    async fn put(&self, paste: &Paste) -> crate::AppResult<()> {
        if !is_valid_id(&paste.id) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid paste id").into());
        }

        let lock = self.lock_for(&paste.id);
        let result = {
            let _guard = lock.lock().await;
            self.write(paste).await
        };
        drop(lock);

        self.forget_lock(&paste.id);
        result
    }

    async fn get(&self, id: &str) -> crate::AppResult<Option<Paste>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        self.read(id).await
    }

    async fn try_consume_view(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> crate::AppResult<ConsumeResult> {
        if !is_valid_id(id) {
            return Ok(ConsumeResult::NotFound);
        }

        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            match self.read(id).await {
                Ok(Some(mut paste)) => {
                    let result = ConsumeResult::consume(&mut paste, now);
                    // unlimited pastes have nothing to persist
                    if matches!(result, ConsumeResult::Ok(_)) && paste.remaining_views.is_some() {
                        self.write(&paste).await.map(|_| result)
                    } else {
                        Ok(result)
                    }
                }
                Ok(None) => Ok(ConsumeResult::NotFound),
                Err(err) => Err(err),
            }
        };
        drop(lock);

        if matches!(result, Ok(ConsumeResult::NotFound)) {
            self.forget_lock(id);
        }
        result
    }

    async fn purge_unavailable(&self, now: DateTime<Utc>) -> crate::AppResult<usize> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut purged = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !is_valid_id(id) {
                continue;
            }

            let lock = self.lock_for(id);
            {
                let _guard = lock.lock().await;
                match self.read(id).await {
                    Ok(Some(paste)) if !paste.is_available(now) => {
                        debug!("purging paste file: {id}");
                        fs::remove_file(&path).await?;
                        purged += 1;
                    }
                    Ok(_) => {}
                    Err(err) => warn!("skipping unreadable paste file {}: {err}", path.display()),
                }
            }
            drop(lock);
            self.forget_lock(id);
        }

        Ok(purged)
    }

    async fn is_healthy(&self) -> bool {
        match fs::metadata(&self.dir).await {
            Ok(metadata) => metadata.is_dir() && !metadata.permissions().readonly(),
            Err(err) => {
                warn!("paste directory is unreachable: {err}");
                false
            }
        }
    }
}

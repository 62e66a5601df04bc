use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{self, StorageKind};
use crate::models::{ConsumeResult, Paste};

pub mod file;
pub mod memory;
pub mod sql;

pub trait Store {
    /// Insert or overwrite a paste record.
    async fn put(&self, paste: &Paste) -> crate::AppResult<()>;

    /// Get a paste record verbatim, without checking availability.
    async fn get(&self, id: &str) -> crate::AppResult<Option<Paste>>;

    /// Check availability at `now` and spend one view, as a single atomic step
    /// with respect to other callers on the same id.
    async fn try_consume_view(&self, id: &str, now: DateTime<Utc>)
        -> crate::AppResult<ConsumeResult>;

    /// Delete every paste that is unavailable at `now`, returning how many went.
    async fn purge_unavailable(&self, now: DateTime<Utc>) -> crate::AppResult<usize>;

    /// Whether the backing medium is reachable.
    async fn is_healthy(&self) -> bool;
}

#[derive(Clone)]
pub struct AnyStore {
    kind: AnyStoreKind,
    health_timeout: Duration,
}

#[derive(Clone)]
enum AnyStoreKind {
    Memory(memory::MemoryStore),
    File(file::FileStore),
    Sql(sql::SqlStore),
}

impl AnyStore {
    /// Open the store selected by configuration.
    pub async fn open(config: &config::Config) -> anyhow::Result<Self> {
        let kind = match config.storage.kind {
            StorageKind::Memory => {
                warn!("using in-memory storage, pastes will not survive a restart");
                AnyStoreKind::Memory(memory::MemoryStore::new())
            }
            StorageKind::File => {
                let file = config.storage.file.as_ref().context("missing [storage.file]")?;
                AnyStoreKind::File(file::FileStore::new(&file.dir).await?)
            }
            StorageKind::Sql => {
                let sql = config.storage.sql.as_ref().context("missing [storage.sql]")?;
                AnyStoreKind::Sql(sql::SqlStore::connect(&sql.url, sql.max_connections).await?)
            }
        };

        Ok(AnyStore {
            kind,
            health_timeout: Duration::from_millis(config.limits.health_timeout_ms),
        })
    }

    fn new(kind: AnyStoreKind) -> Self {
        AnyStore {
            kind,
            health_timeout: Duration::from_millis(2000),
        }
    }
}

impl Store for AnyStore {
    async fn put(&self, paste: &Paste) -> crate::AppResult<()> {
        match &self.kind {
            AnyStoreKind::Memory(store) => store.put(paste).await,
            AnyStoreKind::File(store) => store.put(paste).await,
            AnyStoreKind::Sql(store) => store.put(paste).await,
        }
    }

    async fn get(&self, id: &str) -> crate::AppResult<Option<Paste>> {
        match &self.kind {
            AnyStoreKind::Memory(store) => store.get(id).await,
            AnyStoreKind::File(store) => store.get(id).await,
            AnyStoreKind::Sql(store) => store.get(id).await,
        }
    }

    async fn try_consume_view(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> crate::AppResult<ConsumeResult> {
        match &self.kind {
            AnyStoreKind::Memory(store) => store.try_consume_view(id, now).await,
            AnyStoreKind::File(store) => store.try_consume_view(id, now).await,
            AnyStoreKind::Sql(store) => store.try_consume_view(id, now).await,
        }
    }

    async fn purge_unavailable(&self, now: DateTime<Utc>) -> crate::AppResult<usize> {
        match &self.kind {
            AnyStoreKind::Memory(store) => store.purge_unavailable(now).await,
            AnyStoreKind::File(store) => store.purge_unavailable(now).await,
            AnyStoreKind::Sql(store) => store.purge_unavailable(now).await,
        }
    }

    async fn is_healthy(&self) -> bool {
        let check = async {
            match &self.kind {
                AnyStoreKind::Memory(store) => store.is_healthy().await,
                AnyStoreKind::File(store) => store.is_healthy().await,
                AnyStoreKind::Sql(store) => store.is_healthy().await,
            }
        };

        match tokio::time::timeout(self.health_timeout, check).await {
            Ok(healthy) => healthy,
            Err(_) => {
                warn!("health check timed out after {:?}", self.health_timeout);
                false
            }
        }
    }
}

impl From<memory::MemoryStore> for AnyStore {
    fn from(value: memory::MemoryStore) -> Self {
        AnyStore::new(AnyStoreKind::Memory(value))
    }
}

impl From<file::FileStore> for AnyStore {
    fn from(value: file::FileStore) -> Self {
        AnyStore::new(AnyStoreKind::File(value))
    }
}

impl From<sql::SqlStore> for AnyStore {
    fn from(value: sql::SqlStore) -> Self {
        AnyStore::new(AnyStoreKind::Sql(value))
    }
}

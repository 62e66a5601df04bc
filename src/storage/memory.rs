use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::Store;
use crate::models::{ConsumeResult, Paste};

/// Process-local store. Cloning shares the same map.
///
/// `DashMap` shards its keys behind separate locks, so a `get_mut` guard gives
/// exclusive access to one id while other ids stay reachable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pastes: Arc<DashMap<String, Paste>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn put(&self, paste: &Paste) -> crate::AppResult<()> {
        self.pastes.insert(paste.id.clone(), paste.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> crate::AppResult<Option<Paste>> {
        Ok(self.pastes.get(id).map(|entry| entry.value().clone()))
    }

    async fn try_consume_view(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> crate::AppResult<ConsumeResult> {
        let Some(mut entry) = self.pastes.get_mut(id) else {
            return Ok(ConsumeResult::NotFound);
        };
        Ok(ConsumeResult::consume(entry.value_mut(), now))
    }

    async fn purge_unavailable(&self, now: DateTime<Utc>) -> crate::AppResult<usize> {
        let mut purged = 0;
        self.pastes.retain(|_, paste| {
            let keep = paste.is_available(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

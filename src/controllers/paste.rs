use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ValidationError;
use crate::models::{ConsumeResult, Paste};
use crate::storage::Store;
use crate::{AppError, AppResult};

/// Input for a new paste, already shaped by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPaste {
    pub content: String,
    pub ttl_seconds: Option<i64>,
    pub max_views: Option<i64>,
}

impl NewPaste {
    pub fn new(content: impl Into<String>) -> Self {
        NewPaste {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn max_views(mut self, max_views: i64) -> Self {
        self.max_views = Some(max_views);
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if matches!(self.ttl_seconds, Some(ttl) if ttl < 1) {
            return Err(ValidationError::InvalidTtl);
        }
        if matches!(self.max_views, Some(views) if views < 1) {
            return Err(ValidationError::InvalidMaxViews);
        }
        Ok(())
    }
}

/// Store a new paste. The expiry instant is fixed here, once.
pub async fn create<S: Store>(store: &S, new: NewPaste, clock: Clock) -> AppResult<Paste> {
    new.validate()?;

    let now = clock.now();
    let expires_at = match new.ttl_seconds {
        Some(ttl) => Some(
            Duration::try_seconds(ttl)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or(ValidationError::InvalidTtl)?,
        ),
        None => None,
    };

    let paste = Paste {
        id: Uuid::new_v4().to_string(),
        content: new.content,
        created_at: now,
        expires_at,
        max_views: new.max_views,
        remaining_views: new.max_views,
    };

    info!(
        "new paste: id='{id}', size={size}, ttl={ttl:?}, max_views={views:?}",
        id = paste.id,
        size = paste.content.len(),
        ttl = new.ttl_seconds,
        views = paste.max_views,
    );

    store.put(&paste).await?;
    Ok(paste)
}

/// Serve a paste, spending one view if it is view-limited.
///
/// Missing, expired and used-up pastes all come back as
/// [`AppError::Unavailable`] so callers cannot tell them apart.
pub async fn retrieve<S: Store>(store: &S, id: &str, clock: Clock) -> AppResult<Paste> {
    match store.try_consume_view(id, clock.now()).await? {
        ConsumeResult::Ok(paste) => Ok(paste),
        reason => {
            debug!("paste {id} unavailable: {reason:?}");
            Err(AppError::Unavailable)
        }
    }
}

/// Delete every paste that can no longer be served.
pub async fn purge_unavailable<S: Store>(store: &S, clock: Clock) -> AppResult<usize> {
    let purged = store.purge_unavailable(clock.now()).await?;
    if purged > 0 {
        info!("deleted {purged} unavailable pastes");
    }
    Ok(purged)
}

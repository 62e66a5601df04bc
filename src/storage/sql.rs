use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::any::{AnyKind, AnyPoolOptions};
use sqlx::{AnyPool, FromRow};
use tracing::{info, warn};

use super::Store;
use crate::clock::from_millis;
use crate::models::{ConsumeResult, Paste};
use crate::AppError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS paste (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    expires_at BIGINT NULL,
    max_views BIGINT NULL,
    remaining_views BIGINT NULL
)";

const UPSERT: &str = "INSERT INTO paste (id, content, created_at, expires_at, max_views, \
     remaining_views) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT (id) DO UPDATE SET content = \
     excluded.content, created_at = excluded.created_at, expires_at = excluded.expires_at, \
     max_views = excluded.max_views, remaining_views = excluded.remaining_views";

const SELECT: &str = "SELECT id, content, created_at, expires_at, max_views, remaining_views \
     FROM paste WHERE id = ?";

// The WHERE clause is the availability predicate, so the row only changes
// when a view may be served. NULL - 1 stays NULL for unlimited pastes.
const CONSUME: &str = "UPDATE paste SET remaining_views = remaining_views - 1 WHERE id = ? AND \
     (expires_at IS NULL OR expires_at >= ?) AND (remaining_views IS NULL OR remaining_views > 0)";

const PURGE: &str = "DELETE FROM paste WHERE (expires_at IS NOT NULL AND expires_at < ?) OR \
     (remaining_views IS NOT NULL AND remaining_views <= 0)";

/// Query text with placeholders in the connected database's dialect.
struct Queries {
    upsert: String,
    select: String,
    consume: String,
    purge: String,
}

impl Queries {
    fn for_kind(kind: AnyKind) -> Self {
        let numbered = is_postgres(kind);
        let dialect = |query: &str| {
            if numbered {
                number_placeholders(query)
            } else {
                query.to_owned()
            }
        };

        Queries {
            upsert: dialect(UPSERT),
            select: dialect(SELECT),
            consume: dialect(CONSUME),
            purge: dialect(PURGE),
        }
    }
}

#[cfg(feature = "postgres")]
fn is_postgres(kind: AnyKind) -> bool {
    matches!(kind, AnyKind::Postgres)
}

#[cfg(not(feature = "postgres"))]
fn is_postgres(_kind: AnyKind) -> bool {
    false
}

/// Rewrite `?` placeholders as `$1, $2, ...`.
fn number_placeholders(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 8);
    let mut n = 0;
    for c in query.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(FromRow)]
struct PasteRow {
    id: String,
    content: String,
    created_at: i64,
    expires_at: Option<i64>,
    max_views: Option<i64>,
    remaining_views: Option<i64>,
}

impl TryFrom<PasteRow> for Paste {
    type Error = AppError;

    fn try_from(row: PasteRow) -> Result<Self, Self::Error> {
        let instant = |millis: i64| {
            from_millis(millis)
                .ok_or_else(|| AppError::Corrupt(format!("paste {} has bad timestamp", row.id)))
        };

        Ok(Paste {
            created_at: instant(row.created_at)?,
            expires_at: row.expires_at.map(instant).transpose()?,
            max_views: row.max_views,
            remaining_views: row.remaining_views,
            content: row.content,
            id: row.id,
        })
    }
}

/// Pastes in a SQL table, shared by any number of server processes.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    queries: Arc<Queries>,
}

impl SqlStore {
    /// Connect to a database by URL and create the paste table if needed.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: AnyPool) -> anyhow::Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        let kind = pool.any_kind();
        info!("connected to {kind:?} paste database");

        Ok(Self {
            queries: Arc::new(Queries::for_kind(kind)),
            pool,
        })
    }
}

impl Store for SqlStore {
    async fn put(&self, paste: &Paste) -> crate::AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(&self.queries.upsert)
            .bind(&paste.id)
            .bind(&paste.content)
            .bind(paste.created_at.timestamp_millis())
            .bind(paste.expires_at.map(|at| at.timestamp_millis()))
            .bind(paste.max_views)
            .bind(paste.remaining_views)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> crate::AppResult<Option<Paste>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, PasteRow>(&self.queries.select)
            .bind(id)
            .fetch_optional(&mut conn)
            .await?;
        row.map(Paste::try_from).transpose()
    }

    async fn try_consume_view(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> crate::AppResult<ConsumeResult> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&self.queries.consume)
            .bind(id)
            .bind(now.timestamp_millis())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let row = sqlx::query_as::<_, PasteRow>(&self.queries.select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        let Some(paste) = row.map(Paste::try_from).transpose()? else {
            return Ok(ConsumeResult::NotFound);
        };

        if updated > 0 {
            return Ok(ConsumeResult::Ok(paste));
        }

        match paste.availability(now) {
            Err(reason) => Ok(reason.into()),
            Ok(()) => Err(AppError::Corrupt(format!(
                "paste {id} is available but could not be consumed"
            ))),
        }
    }

    async fn purge_unavailable(&self, now: DateTime<Utc>) -> crate::AppResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let purged = sqlx::query(&self.queries.purge)
            .bind(now.timestamp_millis())
            .execute(&mut conn)
            .await?
            .rows_affected();
        Ok(purged as usize)
    }

    async fn is_healthy(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(err) => {
                warn!("paste database is unreachable: {err}");
                false
            }
        }
    }
}

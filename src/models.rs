use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paste {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<i64>,
    pub remaining_views: Option<i64>,
}

/// Why a paste cannot be served at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailability {
    Expired,
    ViewLimitReached,
}

impl Paste {
    /// Check the availability predicate at `now`. Time is checked first.
    pub fn availability(&self, now: DateTime<Utc>) -> Result<(), Unavailability> {
        if let Some(expires_at) = self.expires_at {
            if now > expires_at {
                return Err(Unavailability::Expired);
            }
        }
        if let Some(remaining) = self.remaining_views {
            if remaining <= 0 {
                return Err(Unavailability::ViewLimitReached);
            }
        }
        Ok(())
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.availability(now).is_ok()
    }

    /// Spend one view of a view-limited paste. Unlimited pastes are untouched.
    pub fn consume_view(&mut self) {
        if let Some(remaining) = self.remaining_views.as_mut() {
            *remaining -= 1;
        }
    }
}

/// Outcome of an atomic read-check-decrement against a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResult {
    Ok(Paste),
    NotFound,
    Expired,
    ViewLimitReached,
}

impl From<Unavailability> for ConsumeResult {
    fn from(reason: Unavailability) -> Self {
        match reason {
            Unavailability::Expired => ConsumeResult::Expired,
            Unavailability::ViewLimitReached => ConsumeResult::ViewLimitReached,
        }
    }
}

impl ConsumeResult {
    /// Evaluate and consume in one step on an already locked record.
    pub fn consume(paste: &mut Paste, now: DateTime<Utc>) -> Self {
        match paste.availability(now) {
            Ok(()) => {
                paste.consume_view();
                ConsumeResult::Ok(paste.clone())
            }
            Err(reason) => reason.into(),
        }
    }
}

use chrono::{DateTime, SubsecRound, TimeZone, Utc};

/// Source of "now" for a single engine call.
///
/// Production callers use [`Clock::System`]; tests and test-mode requests pin
/// the time with [`Clock::Fixed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Pin the clock to an instant given in milliseconds since the epoch.
    pub fn from_millis(millis: i64) -> Option<Self> {
        from_millis(millis).map(Clock::Fixed)
    }

    /// The current instant, truncated to milliseconds.
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now().trunc_subsecs(3),
            Clock::Fixed(at) => at.trunc_subsecs(3),
        }
    }
}

/// Convert epoch milliseconds back into an instant.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

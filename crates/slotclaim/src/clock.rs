//! Wall-clock sources and the attempt deadline.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time anchored to tokio's monotonic clock.
///
/// Reads `origin` plus the time elapsed on `tokio::time::Instant` since
/// creation, so it follows a paused runtime when tokio's clock is advanced.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor.elapsed()).unwrap_or(TimeDelta::MAX);
        self.origin
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Strict expiry test: the window is still open at exactly `deadline`.
pub fn has_expired(now: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
    now > deadline
}

/// Last instant at which a new iteration may start.
///
/// Computed once per session as release instant plus grace window. A session
/// without a release instant has no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<DateTime<Utc>>,
}

impl Deadline {
    pub fn new(release_at: DateTime<Utc>, grace: Duration) -> Self {
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
        Self {
            at: Some(
                release_at
                    .checked_add_signed(grace)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        }
    }

    pub fn unbounded() -> Self {
        Self { at: None }
    }

    pub fn from_release(release_at: Option<DateTime<Utc>>, grace: Duration) -> Self {
        match release_at {
            Some(at) => Self::new(at, grace),
            None => Self::unbounded(),
        }
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.at
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.at.is_some_and(|deadline| has_expired(now, deadline))
    }

    /// Check against the given clock.
    pub fn is_past<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        self.has_expired(clock.now())
    }
}

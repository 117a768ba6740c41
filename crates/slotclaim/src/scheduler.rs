//! Waiting for the start instant ahead of the release.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;

use crate::clock::Clock;

const TICK: Duration = Duration::from_secs(1);

/// Something observed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// Whole seconds (rounded up) left until the start instant.
    Tick { remaining_secs: u64 },
    /// Waiting began after the start instant; nothing was slept.
    LateStart { behind: Duration },
}

/// Holds the session until a lead time before the release instant.
#[derive(Debug, Clone, Copy)]
pub struct WaitScheduler {
    lead: Duration,
}

impl WaitScheduler {
    pub fn new(lead: Duration) -> Self {
        Self { lead }
    }

    pub fn lead(&self) -> Duration {
        self.lead
    }

    /// Instant at which active work should begin.
    pub fn start_instant(&self, release_at: DateTime<Utc>) -> DateTime<Utc> {
        chrono::TimeDelta::from_std(self.lead)
            .ok()
            .and_then(|lead| release_at.checked_sub_signed(lead))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Countdown to the start instant.
    ///
    /// Nothing happens until the stream is polled. It yields one
    /// [`WaitEvent::Tick`] per second and ends once the start instant is
    /// reached, or yields a single [`WaitEvent::LateStart`] and ends
    /// immediately if it already has been. The stream is consumed by driving
    /// it and cannot be restarted.
    pub fn countdown<'a, C>(
        &self,
        clock: &'a C,
        release_at: DateTime<Utc>,
    ) -> impl Stream<Item = WaitEvent> + 'a
    where
        C: Clock + ?Sized,
    {
        let start_at = self.start_instant(release_at);
        async_stream::stream! {
            let now = clock.now();
            if now >= start_at {
                let behind = (now - start_at).to_std().unwrap_or_default();
                yield WaitEvent::LateStart { behind };
                return;
            }
            loop {
                let remaining = match (start_at - clock.now()).to_std() {
                    Ok(r) if !r.is_zero() => r,
                    _ => break,
                };
                yield WaitEvent::Tick { remaining_secs: ceil_secs(remaining) };
                tokio::time::sleep(remaining.min(TICK)).await;
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

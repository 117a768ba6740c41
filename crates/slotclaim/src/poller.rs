//! Refreshing until the target date can be selected.

use std::time::Duration;

use rand::Rng;

use crate::clock::{Clock, Deadline};
use crate::config::BookingConfig;
use crate::events::{EventEmitter, SessionEventKind};
use crate::humanize::Humanizer;
use crate::page::{find_option_containing, Page};
use crate::types::{ClaimError, ClaimResult};

/// Polls the date options until the target appears.
#[derive(Debug, Clone)]
pub struct DatePoller {
    option_selector: String,
    target_date: String,
    backoff: Duration,
}

impl DatePoller {
    pub fn new(option_selector: impl Into<String>, target_date: impl Into<String>, backoff: Duration) -> Self {
        Self {
            option_selector: option_selector.into(),
            target_date: target_date.into(),
            backoff,
        }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(
            config.selectors.date_option.clone(),
            config.target_date.clone(),
            config.timing.date_backoff(),
        )
    }

    /// Scan, select on a hit, else back off, reload and scan again.
    ///
    /// The deadline is checked at the top of every iteration only. Lookup,
    /// click and reload errors count as "not yet available". Returns the
    /// number of scans it took.
    pub async fn poll<P, C, R>(
        &self,
        page: &P,
        clock: &C,
        deadline: &Deadline,
        humanizer: &Humanizer,
        rng: &mut R,
        events: &EventEmitter,
    ) -> ClaimResult<u32>
    where
        P: Page + ?Sized,
        C: Clock + ?Sized,
        R: Rng + ?Sized,
    {
        let mut scans = 0u32;
        loop {
            if deadline.is_past(clock) {
                tracing::warn!(
                    "Deadline passed after {scans} scans for date {}",
                    self.target_date
                );
                return Err(ClaimError::DeadlineExceeded);
            }
            scans += 1;

            match find_option_containing(page, &self.option_selector, &self.target_date).await {
                Ok(Some((option, text))) => match humanizer.click(page, option, rng).await {
                    Ok(()) => {
                        tracing::info!("Selected date {} after {scans} scans", text.trim());
                        return Ok(scans);
                    }
                    Err(e) => tracing::debug!("Date option went away before the click: {e}"),
                },
                Ok(None) => {}
                Err(e) => tracing::debug!("Date scan {scans} failed: {e}"),
            }

            tracing::warn!(
                "Date {} not offered yet (scan {scans}), refreshing in {:?}",
                self.target_date,
                self.backoff
            );
            events.emit(SessionEventKind::DatePollMiss { attempt: scans });
            tokio::time::sleep(self.backoff).await;
            if let Err(e) = page.reload().await {
                tracing::warn!("Reload failed: {e}");
            }
        }
    }
}

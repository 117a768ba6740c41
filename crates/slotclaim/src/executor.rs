//! One booking attempt: click the group, submit, and watch for a result.

use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior};

use crate::classifier::{fresh_surface, SurfaceSnapshot};
use crate::config::BookingConfig;
use crate::humanize::Humanizer;
use crate::page::{Page, FIND_POLL_INTERVAL};
use crate::selector::AttemptGroup;
use crate::types::ClaimResult;

/// What happened during one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    /// Whether a result surface appeared at any point.
    pub result_observed: bool,
    /// Submit clicks made by the confirmation loop.
    pub confirm_clicks: u32,
    /// Time spent in the confirmation loop.
    pub confirm_elapsed: Duration,
    /// Result surfaces still showing an earlier result when the attempt began.
    pub leftover: SurfaceSnapshot,
}

/// Drives a single submission attempt.
///
/// Does not judge the result; see [`ResultClassifier`](crate::classifier::ResultClassifier).
#[derive(Debug, Clone)]
pub struct BookingAttemptExecutor {
    submit_selector: String,
    result_selector: String,
    clear_wait: Duration,
    submit_wait: Duration,
    confirm_cadence: Duration,
    confirm_budget: Duration,
    result_wait: Duration,
}

impl BookingAttemptExecutor {
    pub fn from_config(config: &BookingConfig) -> Self {
        Self {
            submit_selector: config.selectors.submit_button.clone(),
            result_selector: config.selectors.result_surface.clone(),
            clear_wait: config.timing.result_clear_wait(),
            submit_wait: config.timing.submit_wait(),
            confirm_cadence: config.timing.confirm_cadence(),
            confirm_budget: config.timing.confirm_budget(),
            result_wait: config.timing.result_wait(),
        }
    }

    /// Click every candidate, submit once, then hammer the submit control
    /// at a fixed cadence until a new result surface shows up or the budget
    /// runs out.
    ///
    /// A surface still showing an earlier result is given the clear wait to
    /// go away and is ignored afterwards unless its text changes. Fails with
    /// `ElementNotFound` if the submit control does not appear within the
    /// submit wait.
    pub async fn execute<P, R>(
        &self,
        page: &P,
        humanizer: &Humanizer,
        rng: &mut R,
        group: &AttemptGroup,
    ) -> ClaimResult<AttemptReport>
    where
        P: Page + ?Sized,
        R: Rng + ?Sized,
    {
        let leftover = self.await_clear(page).await;

        for candidate in group.candidates() {
            tracing::debug!(
                "Clicking candidate {} ({})",
                candidate.id,
                candidate.row_label
            );
            humanizer.click(page, candidate.element, rng).await?;
        }

        let submit = page.find(&self.submit_selector, self.submit_wait).await?;
        humanizer.click(page, submit, rng).await?;

        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.confirm_cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut confirm_clicks = 0u32;
        let mut result_observed = false;

        loop {
            ticker.tick().await;
            if started.elapsed() >= self.confirm_budget {
                break;
            }
            if let Err(e) = page.click(submit).await {
                tracing::debug!("Confirmation click failed: {e}");
            }
            confirm_clicks += 1;
            if self.sees_result(page, &leftover).await {
                result_observed = true;
                break;
            }
        }
        let confirm_elapsed = started.elapsed();

        if !result_observed {
            let waiting = Instant::now();
            loop {
                if self.sees_result(page, &leftover).await {
                    result_observed = true;
                    break;
                }
                if waiting.elapsed() >= self.result_wait {
                    break;
                }
                tokio::time::sleep(FIND_POLL_INTERVAL).await;
            }
        }

        tracing::info!(
            "Attempt finished: result surface {}, {} confirmation clicks in {:?}",
            if result_observed { "seen" } else { "missing" },
            confirm_clicks,
            confirm_elapsed
        );

        Ok(AttemptReport {
            result_observed,
            confirm_clicks,
            confirm_elapsed,
            leftover,
        })
    }

    async fn sees_result<P: Page + ?Sized>(&self, page: &P, leftover: &SurfaceSnapshot) -> bool {
        matches!(
            fresh_surface(page, &self.result_selector, leftover).await,
            Ok(Some(_))
        )
    }

    /// Wait for the previous result surface to go away.
    ///
    /// Returns whatever is still shown when the clear wait runs out.
    async fn await_clear<P: Page + ?Sized>(&self, page: &P) -> SurfaceSnapshot {
        let started = Instant::now();
        loop {
            let shown = SurfaceSnapshot::capture(page, &self.result_selector).await;
            if shown.is_empty() {
                return shown;
            }
            if started.elapsed() >= self.clear_wait {
                tracing::warn!(
                    "Previous result still shown after {:?}, ignoring it",
                    self.clear_wait
                );
                return shown;
            }
            tokio::time::sleep(FIND_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HumanizeConfig, Selectors};
    use crate::pool::{CandidatePool, ScannedSlot};
    use crate::selector::SlotSelector;
    use crate::testing::ScriptedPage;
    use crate::types::{ClaimError, ElementHandle};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> BookingConfig {
        BookingConfig {
            selectors: Selectors {
                submit_button: "submit".into(),
                result_surface: "modal".into(),
                ..Selectors::default()
            },
            humanize: HumanizeConfig::instant(),
            ..BookingConfig::default()
        }
    }

    fn group_for(elements: &[ElementHandle]) -> AttemptGroup {
        let scanned = elements
            .iter()
            .map(|e| ScannedSlot {
                element: *e,
                row_label: "21:00-22:00".into(),
                available: true,
            })
            .collect();
        let pool = CandidatePool::build(scanned, &[]).unwrap();
        SlotSelector::new(elements.len())
            .select(&pool, &mut StdRng::seed_from_u64(0))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_result_caps_clicks_and_time() {
        let page = ScriptedPage::new();
        let a = page.add("slot", "A");
        page.add("submit", "Book");
        let cfg = config();
        let executor = BookingAttemptExecutor::from_config(&cfg);
        let humanizer = Humanizer::new(cfg.humanize.clone());

        let report = executor
            .execute(&page, &humanizer, &mut StdRng::seed_from_u64(1), &group_for(&[a]))
            .await
            .unwrap();

        assert!(!report.result_observed);
        assert_eq!(report.confirm_clicks, 16);
        assert!(report.confirm_elapsed <= Duration::from_millis(2_000 + 125));
        assert_eq!(page.clicks(a), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_observed_result() {
        let page = ScriptedPage::new();
        let a = page.add("slot", "A");
        let b = page.add("slot", "B");
        let submit = page.add("submit", "Book");
        let modal = page.add_hidden("modal", "预约成功");
        let mut presses = 0;
        page.on_click(submit, move |scene| {
            presses += 1;
            // The humanized submit is press 1; the modal shows on the 3rd loop click.
            if presses == 4 {
                scene.show(modal);
            }
        });
        let cfg = config();
        let executor = BookingAttemptExecutor::from_config(&cfg);
        let humanizer = Humanizer::new(cfg.humanize.clone());

        let report = executor
            .execute(&page, &humanizer, &mut StdRng::seed_from_u64(1), &group_for(&[a, b]))
            .await
            .unwrap();

        assert!(report.result_observed);
        assert_eq!(report.confirm_clicks, 3);
        assert_eq!(page.clicks(submit), 4);
        assert_eq!(page.clicks(a), 1);
        assert_eq!(page.clicks(b), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_is_caught_by_final_wait() {
        let page = ScriptedPage::new();
        let a = page.add("slot", "A");
        page.add("submit", "Book");
        let modal = page.add_hidden("modal", "done");
        let cfg = config();
        let executor = BookingAttemptExecutor::from_config(&cfg);
        let humanizer = Humanizer::new(cfg.humanize.clone());

        let reveal = async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            page.scene(|s| s.show(modal));
        };
        let mut rng = StdRng::seed_from_u64(1);
        let group = group_for(&[a]);

        let (report, ()) = tokio::join!(
            executor.execute(&page, &humanizer, &mut rng, &group),
            reveal
        );
        let report = report.unwrap();
        assert!(report.result_observed);
        assert_eq!(report.confirm_clicks, 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_rejection_is_not_this_attempts_result() {
        let page = ScriptedPage::new();
        let a = page.add("slot", "A");
        let submit = page.add("submit", "Book");
        let modal = page.add("modal", "该场地已被预约");
        let mut presses = 0;
        page.on_click(submit, move |scene| {
            presses += 1;
            if presses == 6 {
                scene.set_text(modal, "预约成功");
            }
        });
        let cfg = config();
        let executor = BookingAttemptExecutor::from_config(&cfg);
        let humanizer = Humanizer::new(cfg.humanize.clone());
        let started = Instant::now();

        let report = executor
            .execute(&page, &humanizer, &mut StdRng::seed_from_u64(1), &group_for(&[a]))
            .await
            .unwrap();

        assert!(started.elapsed() >= cfg.timing.result_clear_wait());
        assert_eq!(report.leftover.len(), 1);
        assert!(report.result_observed);
        assert_eq!(report.confirm_clicks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_surface_needs_no_clear_wait() {
        let page = ScriptedPage::new();
        let a = page.add("slot", "A");
        page.add("submit", "Book");
        let modal = page.add("modal", "该场地已被预约");
        let cfg = config();
        let executor = BookingAttemptExecutor::from_config(&cfg);
        let humanizer = Humanizer::new(cfg.humanize.clone());

        let fade = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            page.scene(|s| s.hide(modal));
        };
        let mut rng = StdRng::seed_from_u64(1);
        let group = group_for(&[a]);
        let started = Instant::now();
        let (report, ()) = tokio::join!(executor.execute(&page, &humanizer, &mut rng, &group), fade);
        let report = report.unwrap();

        assert!(report.leftover.is_empty());
        assert!(!report.result_observed);
        assert_eq!(page.clicks(a), 1);
        // Cleared after the fade, then the usual confirm budget and result wait.
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_submit_is_element_not_found() {
        let page = ScriptedPage::new();
        let a = page.add("slot", "A");
        let cfg = config();
        let executor = BookingAttemptExecutor::from_config(&cfg);
        let humanizer = Humanizer::new(cfg.humanize.clone());
        let started = Instant::now();

        let err = executor
            .execute(&page, &humanizer, &mut StdRng::seed_from_u64(1), &group_for(&[a]))
            .await
            .unwrap_err();

        assert_eq!(err, ClaimError::not_found("submit"));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}

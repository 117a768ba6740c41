//! Progress display and end-of-run reporting.

use std::path::Path;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use slotclaim::{EventReceiver, Page, RunOutcome, RunReport, ScreenshotTarget, SessionEventKind};

/// One-line description of an event worth showing the operator, if any.
pub fn describe(kind: &SessionEventKind) -> Option<String> {
    match kind {
        SessionEventKind::CountdownTick { remaining_secs }
            if *remaining_secs <= 5 || remaining_secs % 10 == 0 =>
        {
            Some(format!("Starting in {remaining_secs}s"))
        }
        SessionEventKind::CountdownTick { .. } => None,
        SessionEventKind::LateStart { behind_secs } => {
            Some(format!("Start time passed {behind_secs}s ago, starting now"))
        }
        SessionEventKind::PoolBuilt { size, filtered } => Some(format!(
            "{size} bookable slots{}",
            if *filtered { " in the wanted time slots" } else { "" }
        )),
        SessionEventKind::AttemptClassified { attempt, outcome } => {
            Some(format!("Attempt {attempt}: {outcome}"))
        }
        SessionEventKind::Warning { message } => Some(format!("Warning: {message}")),
        SessionEventKind::StateChanged { .. }
        | SessionEventKind::DatePollMiss { .. }
        | SessionEventKind::AttemptStarted { .. }
        | SessionEventKind::CandidatesRemoved { .. } => None,
    }
}

/// Log events as they arrive until the channel closes.
pub fn spawn_event_logger(mut rx: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event.kind) {
                        tracing::info!(target: "slotclaim::progress", "{line}");
                    } else {
                        tracing::trace!(target: "slotclaim::progress", seq = event.seq, "{:?}", event.kind);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!("Progress display skipped {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Wait for the event logger to drain. Returns whether it ended cleanly.
pub async fn finish_event_logger(logger: JoinHandle<()>) -> bool {
    match logger.await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Progress logger stopped abnormally: {e}");
            false
        }
    }
}

/// Process exit code for a finished run.
pub fn exit_code(outcome: &RunOutcome) -> i32 {
    if outcome.is_success() {
        0
    } else {
        1
    }
}

/// Save a full-page screenshot for post-mortem inspection.
pub async fn save_debug_screenshot<P: Page + ?Sized>(page: &P, path: &Path) -> anyhow::Result<()> {
    let png = page
        .screenshot(ScreenshotTarget::FullPage)
        .await
        .context("failed to capture screenshot")?;
    tokio::fs::write(path, png)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("Saved screenshot to {}", path.display());
    Ok(())
}

/// The run report as one line of JSON.
pub fn to_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string(report)
}

/// Human-readable summary of a run.
pub fn summary(report: &RunReport) -> String {
    let mut out = format!(
        "Run {}: {} after {} attempt{}",
        report.run_id,
        report.outcome,
        report.attempts,
        if report.attempts == 1 { "" } else { "s" }
    );
    if let Some(pool) = report.initial_pool {
        out.push_str(&format!(" (pool of {pool})"));
    }
    if report.late_start {
        out.push_str(", started late");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotclaim::{ClaimError, Outcome, SessionState};

    fn report(outcome: RunOutcome, attempts: u32) -> RunReport {
        RunReport {
            run_id: "run-1".into(),
            outcome,
            attempts,
            initial_pool: Some(4),
            late_start: true,
            history: vec![SessionState::Init],
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&RunOutcome::Success), 0);
        assert_eq!(exit_code(&RunOutcome::Exhausted), 1);
        assert_eq!(exit_code(&RunOutcome::TimedOut), 1);
        assert_eq!(
            exit_code(&RunOutcome::Fatal(ClaimError::DeadlineExceeded)),
            1
        );
    }

    #[test]
    fn test_countdown_is_thinned() {
        let tick = |s| SessionEventKind::CountdownTick { remaining_secs: s };
        assert!(describe(&tick(60)).is_some());
        assert!(describe(&tick(37)).is_none());
        assert_eq!(describe(&tick(3)).as_deref(), Some("Starting in 3s"));
    }

    #[test]
    fn test_describe_attempt_result() {
        let line = describe(&SessionEventKind::AttemptClassified {
            attempt: 2,
            outcome: Outcome::Failure,
        });
        assert_eq!(line.as_deref(), Some("Attempt 2: failure"));
    }

    #[test]
    fn test_summary() {
        let text = summary(&report(RunOutcome::Success, 1));
        assert_eq!(text, "Run run-1: success after 1 attempt (pool of 4), started late");
        assert!(summary(&report(RunOutcome::Exhausted, 3)).contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_logger_ends_when_channel_closes() {
        let (tx, rx) = slotclaim::events::channel();
        let logger = spawn_event_logger(rx);
        drop(tx);
        assert!(finish_event_logger(logger).await);
    }

    #[tokio::test]
    async fn test_panicked_logger_is_reported_not_propagated() {
        let logger = tokio::spawn(async { panic!("display failed") });
        assert!(!finish_event_logger(logger).await);
    }

    #[test]
    fn test_report_json_spells_out_outcome() {
        let json = to_json(&report(RunOutcome::TimedOut, 2)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["outcome"], "timed out: deadline passed");
        assert_eq!(value["attempts"], 2);
        assert_eq!(value["history"][0], "init");
    }

    #[tokio::test]
    async fn test_debug_screenshot_written() {
        let page = slotclaim::testing::ScriptedPage::new();
        page.scene(|s| s.set_screenshot(vec![0x89, b'P', b'N', b'G']));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error_screenshot.png");

        save_debug_screenshot(&page, &path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }
}

//! The session state machine tying every component together.
//!
//! One run walks `Init → Authenticating → SelectingCampus → SelectingFacility
//! → AwaitingDate` exactly once, then loops `SelectingSlots → Submitting →
//! Classifying → Retrying` until an attempt succeeds, the pool runs dry or
//! the deadline passes. Any failure in a one-time phase ends the run as
//! `Fatal`.

use futures::StreamExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::classifier::{ResultClassifier, SurfaceSnapshot};
use crate::clock::{Clock, Deadline, SystemClock};
use crate::config::BookingConfig;
use crate::events::{EventEmitter, EventSender, SessionEventKind};
use crate::executor::BookingAttemptExecutor;
use crate::humanize::Humanizer;
use crate::page::{find_option_containing, is_present, CaptchaSolver, Page, ScreenshotTarget};
use crate::poller::DatePoller;
use crate::pool::{scan_slots, CandidatePool};
use crate::scheduler::{WaitEvent, WaitScheduler};
use crate::selector::{AttemptGroup, SlotSelector};
use crate::state::SessionState;
use crate::types::{ClaimError, ClaimResult, ErrorKind, Outcome};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Every candidate was tried and rejected.
    Exhausted,
    /// The deadline passed before a slot was claimed.
    TimedOut,
    /// A one-time phase failed.
    Fatal(ClaimError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Exhausted => write!(f, "exhausted: every candidate was rejected"),
            Self::TimedOut => write!(f, "timed out: deadline passed"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: RunOutcome,
    /// Submission attempts made.
    pub attempts: u32,
    /// Pool size right after the date was selected.
    pub initial_pool: Option<usize>,
    pub late_start: bool,
    /// Every state entered, in order, starting with `Init`.
    pub history: Vec<SessionState>,
}

fn serialize_outcome<S: serde::Serializer>(outcome: &RunOutcome, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&outcome.to_string())
}

/// Runs one booking session against a page.
pub struct RetryOrchestrator<P, S, C = SystemClock> {
    config: BookingConfig,
    page: P,
    solver: S,
    clock: C,
    rng: StdRng,
    events: EventEmitter,
    humanizer: Humanizer,
    state: SessionState,
    history: Vec<SessionState>,
}

impl<P, S> RetryOrchestrator<P, S, SystemClock>
where
    P: Page,
    S: CaptchaSolver,
{
    /// Orchestrator on the system clock with an entropy-seeded RNG.
    pub fn new(config: BookingConfig, page: P, solver: S) -> ClaimResult<Self> {
        Self::with_clock(config, page, solver, SystemClock)
    }
}

impl<P, S, C> RetryOrchestrator<P, S, C>
where
    P: Page,
    S: CaptchaSolver,
    C: Clock,
{
    pub fn with_clock(config: BookingConfig, page: P, solver: S, clock: C) -> ClaimResult<Self> {
        config.validate()?;
        let humanizer = Humanizer::new(config.humanize.clone());
        Ok(Self {
            config,
            page,
            solver,
            clock,
            rng: StdRng::from_entropy(),
            events: EventEmitter::new(None, uuid::Uuid::new_v4().to_string()),
            humanizer,
            state: SessionState::Init,
            history: vec![SessionState::Init],
        })
    }

    /// Replace the random source, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Publish progress events on `tx`.
    pub fn with_events(mut self, tx: EventSender) -> Self {
        let run_id = self.events.run_id().to_string();
        self.events = EventEmitter::new(Some(tx), run_id);
        self
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn run_id(&self) -> &str {
        self.events.run_id()
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::info!("State: {} -> {}", self.state, next);
        self.events.emit(SessionEventKind::StateChanged {
            from: self.state,
            to: next,
        });
        self.state = next;
        self.history.push(next);
    }

    /// Wait for the start instant if a release instant is configured.
    ///
    /// Returns whether the start instant had already passed.
    pub async fn wait_for_release(&mut self) -> bool {
        let Some(release_at) = self.config.release_at else {
            return false;
        };
        let scheduler = WaitScheduler::new(self.config.timing.lead_time());
        tracing::info!(
            "Release at {}, starting at {}",
            release_at,
            scheduler.start_instant(release_at)
        );

        let mut late = false;
        let countdown = scheduler.countdown(&self.clock, release_at);
        futures::pin_mut!(countdown);
        while let Some(event) = countdown.next().await {
            match event {
                WaitEvent::Tick { remaining_secs } => {
                    self.events
                        .emit(SessionEventKind::CountdownTick { remaining_secs });
                }
                WaitEvent::LateStart { behind } => {
                    late = true;
                    tracing::warn!("Start instant passed {:?} ago, starting immediately", behind);
                    self.events.emit(SessionEventKind::LateStart {
                        behind_secs: behind.as_secs(),
                    });
                }
            }
        }
        late
    }

    /// Run the whole session: wait, then drive the state machine to a terminal state.
    pub async fn run(&mut self) -> RunReport {
        let late_start = self.wait_for_release().await;
        let deadline = Deadline::from_release(self.config.release_at, self.config.grace_window());
        if let Some(at) = deadline.at() {
            tracing::info!("Attempts allowed until {at}");
        }

        let selector = SlotSelector::new(self.config.attempt_group_size);
        let executor = BookingAttemptExecutor::from_config(&self.config);
        let classifier = ResultClassifier::from_config(&self.config);
        let poller = DatePoller::from_config(&self.config);

        let mut pool: Option<CandidatePool> = None;
        let mut group: Option<AttemptGroup> = None;
        let mut failure: Option<ClaimError> = None;
        let mut leftover = SurfaceSnapshot::default();
        let mut attempts = 0u32;
        let mut initial_pool = None;

        while !self.state.is_terminal() {
            let current = self.state;
            let next = match current {
                SessionState::Init => SessionState::Authenticating,

                SessionState::Authenticating => match self.authenticate().await {
                    Ok(()) => SessionState::SelectingCampus,
                    Err(e) => fatal(&mut failure, e),
                },

                SessionState::SelectingCampus => {
                    let selector = self.config.selectors.campus_option.clone();
                    let name = self.config.campus_name.clone();
                    match self.select_named(&selector, &name, "campus").await {
                        Ok(()) => SessionState::SelectingFacility,
                        Err(e) => fatal(&mut failure, e),
                    }
                }

                SessionState::SelectingFacility => {
                    let selector = self.config.selectors.facility_option.clone();
                    let name = self.config.facility_name.clone();
                    match self.select_named(&selector, &name, "facility").await {
                        Ok(()) => SessionState::AwaitingDate,
                        Err(e) => fatal(&mut failure, e),
                    }
                }

                SessionState::AwaitingDate => {
                    let polled = poller
                        .poll(
                            &self.page,
                            &self.clock,
                            &deadline,
                            &self.humanizer,
                            &mut self.rng,
                            &self.events,
                        )
                        .await;
                    match polled {
                        Ok(_) => match self.build_pool().await {
                            Ok(built) => {
                                initial_pool = Some(built.len());
                                pool = Some(built);
                                SessionState::SelectingSlots
                            }
                            Err(e) => fatal(&mut failure, e),
                        },
                        Err(e) if e.kind() == ErrorKind::DeadlineExceeded => SessionState::TimedOut,
                        Err(e) => fatal(&mut failure, e),
                    }
                }

                SessionState::SelectingSlots => {
                    if deadline.is_past(&self.clock) {
                        SessionState::TimedOut
                    } else {
                        let drawn = match pool.as_ref() {
                            Some(p) => selector.select(p, &mut self.rng),
                            None => Err(ClaimError::CandidatePoolExhausted),
                        };
                        match drawn {
                            Ok(g) => {
                                group = Some(g);
                                SessionState::Submitting
                            }
                            Err(e) if e.is_terminal() => {
                                tracing::warn!("No candidates left: {e}");
                                SessionState::Exhausted
                            }
                            Err(e) => fatal(&mut failure, e),
                        }
                    }
                }

                SessionState::Submitting => {
                    attempts += 1;
                    match group.as_ref() {
                        Some(g) => {
                            tracing::info!(
                                "Attempt {attempts}: {}",
                                g.candidates()
                                    .iter()
                                    .map(|c| format!("{} [{}]", c.id, c.row_label))
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            );
                            self.events.emit(SessionEventKind::AttemptStarted {
                                attempt: attempts,
                                candidates: g.ids(),
                            });
                            match executor
                                .execute(&self.page, &self.humanizer, &mut self.rng, g)
                                .await
                            {
                                Ok(attempt) => {
                                    leftover = attempt.leftover;
                                    SessionState::Classifying
                                }
                                Err(e) => {
                                    tracing::warn!("Attempt {attempts} could not be submitted: {e}");
                                    self.events.warn(format!("submission failed: {e}"));
                                    SessionState::Retrying
                                }
                            }
                        }
                        None => SessionState::Retrying,
                    }
                }

                SessionState::Classifying => {
                    let classified = classifier.classify_since(&self.page, &leftover).await;
                    let outcome = classified.unwrap_or_else(|e| {
                        tracing::warn!("Could not read attempt result: {e}");
                        Outcome::Unknown
                    });
                    self.events.emit(SessionEventKind::AttemptClassified {
                        attempt: attempts,
                        outcome,
                    });
                    if outcome.is_success() {
                        tracing::info!("Attempt {attempts} succeeded");
                        SessionState::Success
                    } else {
                        tracing::warn!("Attempt {attempts} classified as {outcome}, retrying");
                        SessionState::Retrying
                    }
                }

                SessionState::Retrying => {
                    let remaining = match (pool.as_mut(), group.take()) {
                        (Some(p), Some(g)) => {
                            p.remove(g.ids());
                            p.len()
                        }
                        (Some(p), None) => p.len(),
                        (None, _) => 0,
                    };
                    self.events
                        .emit(SessionEventKind::CandidatesRemoved { remaining });
                    self.dismiss_result().await;

                    if remaining == 0 {
                        SessionState::Exhausted
                    } else if deadline.is_past(&self.clock) {
                        SessionState::TimedOut
                    } else {
                        SessionState::SelectingSlots
                    }
                }

                SessionState::Success
                | SessionState::Exhausted
                | SessionState::TimedOut
                | SessionState::Fatal => break,
            };
            self.transition(next);
        }

        let outcome = match self.state {
            SessionState::Success => RunOutcome::Success,
            SessionState::Exhausted => RunOutcome::Exhausted,
            SessionState::TimedOut => RunOutcome::TimedOut,
            _ => RunOutcome::Fatal(failure.unwrap_or_else(|| {
                ClaimError::Navigation("session ended without a recorded error".to_string())
            })),
        };
        tracing::info!("Run {} finished: {outcome}", self.run_id());

        RunReport {
            run_id: self.run_id().to_string(),
            outcome,
            attempts,
            initial_pool,
            late_start,
            history: self.history.clone(),
        }
    }

    async fn authenticate(&mut self) -> ClaimResult<()> {
        if self.config.username.trim().is_empty() || self.config.password.is_empty() {
            return Err(ClaimError::Authentication("missing credentials".to_string()));
        }
        let sel = self.config.selectors.clone();
        let timing = self.config.timing.clone();

        tracing::info!("Opening {}", self.config.base_url);
        self.page.navigate(&self.config.base_url).await?;
        let username = self.page.find(&sel.username_input, timing.login_form_wait()).await?;
        self.humanizer.settle(&mut self.rng).await;

        let user = self.config.username.clone();
        self.humanizer
            .type_text(&self.page, username, &user, &mut self.rng)
            .await?;
        let password = self.page.find(&sel.password_input, timing.login_form_wait()).await?;
        let pass = self.config.password.clone();
        self.humanizer
            .type_text(&self.page, password, &pass, &mut self.rng)
            .await?;

        let captcha = self.solve_captcha().await?;
        let captcha_input = self.page.find(&sel.captcha_input, timing.captcha_wait()).await?;
        self.humanizer
            .type_text(&self.page, captcha_input, &captcha, &mut self.rng)
            .await?;

        let login = self.page.find(&sel.login_button, timing.login_form_wait()).await?;
        self.humanizer.click(&self.page, login, &mut self.rng).await?;
        self.humanizer.settle(&mut self.rng).await;

        if is_present(&self.page, &sel.username_input).await {
            return Err(ClaimError::Authentication(
                "login form still shown after submitting credentials".to_string(),
            ));
        }
        tracing::info!("Logged in as {}", self.config.username);

        self.dismiss_notification().await;
        Ok(())
    }

    async fn solve_captcha(&mut self) -> ClaimResult<String> {
        let image = self
            .page
            .find(&self.config.selectors.captcha_image, self.config.timing.captcha_wait())
            .await?;
        self.humanizer.settle(&mut self.rng).await;
        let bytes = self.page.screenshot(ScreenshotTarget::Element(image)).await?;
        let text = self.solver.classify(&bytes).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ClaimError::Ocr("recognizer returned no text".to_string()));
        }
        tracing::info!("Captcha read as {text}");
        Ok(text)
    }

    /// Close the post-login notice. Failures are absorbed.
    async fn dismiss_notification(&mut self) {
        let selector = self.config.selectors.notification_close.clone();
        let first = self.config.timing.notification_wait();
        let retry = self.config.timing.notification_retry_wait();

        if self.click_when_present(&selector, first).await {
            tracing::info!("Closed notification dialog");
            return;
        }
        tracing::warn!("Notification dialog not found, reloading");
        if let Err(e) = self.page.reload().await {
            tracing::warn!("Reload failed: {e}");
        }
        self.humanizer.settle(&mut self.rng).await;
        if self.click_when_present(&selector, retry).await {
            tracing::info!("Closed notification dialog after reload");
        } else {
            tracing::warn!("Notification dialog still missing, continuing");
            self.events.warn("notification dialog not found");
        }
    }

    async fn click_when_present(&mut self, selector: &str, wait: std::time::Duration) -> bool {
        let Ok(element) = self.page.find(selector, wait).await else {
            return false;
        };
        match self.humanizer.click(&self.page, element, &mut self.rng).await {
            Ok(()) => {
                self.humanizer.settle(&mut self.rng).await;
                true
            }
            Err(e) => {
                tracing::debug!("Click on {selector} failed: {e}");
                false
            }
        }
    }

    async fn select_named(&mut self, selector: &str, name: &str, what: &str) -> ClaimResult<()> {
        let (option, text) = find_option_containing(&self.page, selector, name)
            .await?
            .ok_or_else(|| ClaimError::NoCandidatesFound(format!("{what} '{name}'")))?;
        self.humanizer.click(&self.page, option, &mut self.rng).await?;
        tracing::info!("Selected {what}: {}", text.trim());
        self.humanizer.settle(&mut self.rng).await;
        Ok(())
    }

    async fn build_pool(&mut self) -> ClaimResult<CandidatePool> {
        self.humanizer.settle(&mut self.rng).await;
        let scanned = scan_slots(&self.page, &self.config.selectors).await?;
        let pool = CandidatePool::build(scanned, &self.config.target_time_slots)?;
        tracing::info!(
            "{} candidates in pool ({})",
            pool.len(),
            if pool.is_filtered() { "matching time slots" } else { "unfiltered" }
        );
        self.events.emit(SessionEventKind::PoolBuilt {
            size: pool.len(),
            filtered: pool.is_filtered(),
        });
        Ok(pool)
    }

    /// Close a rejection dialog so the next group can be clicked.
    async fn dismiss_result(&mut self) {
        let selector = self.config.selectors.result_dismiss.clone();
        let Ok(found) = self.page.find_all(&selector).await else {
            return;
        };
        if let Some(close) = found.first() {
            if let Err(e) = self.page.click(*close).await {
                tracing::warn!("Could not close result dialog: {e}");
                self.events.warn(format!("result dialog not closed: {e}"));
            }
        }
    }
}

fn fatal(slot: &mut Option<ClaimError>, error: ClaimError) -> SessionState {
    tracing::error!("Session aborted: {error}");
    *slot = Some(error);
    SessionState::Fatal
}

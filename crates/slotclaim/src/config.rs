//! Booking configuration: targets, locators, timing and humanization.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ClaimError, ClaimResult};

/// Default grace window past the release instant, in minutes.
pub const DEFAULT_GRACE_MINUTES: u64 = 10;

/// Default offset used to interpret release instants without one.
pub const DEFAULT_UTC_OFFSET: &str = "+08:00";

/// Format accepted for release instants without an explicit offset.
pub const RELEASE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything a booking session needs to know.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    pub username: String,
    pub password: String,
    pub campus_name: String,
    pub facility_name: String,
    /// Label of the date option to select, e.g. `9-17`.
    pub target_date: String,
    /// Preferred time-slot labels; an empty list accepts any slot.
    pub target_time_slots: Vec<String>,
    /// Moment the slots are released. `None` starts immediately with no deadline.
    pub release_at: Option<DateTime<Utc>>,
    pub grace_minutes: u64,
    /// Offset used to read naive release instants, e.g. `+08:00`.
    pub utc_offset: String,
    pub debug: bool,
    pub base_url: String,
    pub success_markers: Vec<String>,
    /// Candidates clicked together in one attempt.
    pub attempt_group_size: usize,
    pub selectors: Selectors,
    pub timing: TimingConfig,
    pub humanize: HumanizeConfig,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            campus_name: "广州校区南校园".to_string(),
            facility_name: "南校园新体育馆羽毛球场（学生）".to_string(),
            target_date: String::new(),
            target_time_slots: Vec::new(),
            release_at: None,
            grace_minutes: DEFAULT_GRACE_MINUTES,
            utc_offset: DEFAULT_UTC_OFFSET.to_string(),
            debug: false,
            base_url: "https://gym.sysu.edu.cn".to_string(),
            success_markers: vec!["预约成功".to_string(), "您已经预约成功".to_string()],
            attempt_group_size: 2,
            selectors: Selectors::default(),
            timing: TimingConfig::default(),
            humanize: HumanizeConfig::default(),
        }
    }
}

impl std::fmt::Debug for BookingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .field("campus_name", &self.campus_name)
            .field("facility_name", &self.facility_name)
            .field("target_date", &self.target_date)
            .field("target_time_slots", &self.target_time_slots)
            .field("release_at", &self.release_at)
            .field("grace_minutes", &self.grace_minutes)
            .field("debug", &self.debug)
            .field("base_url", &self.base_url)
            .field("attempt_group_size", &self.attempt_group_size)
            .finish_non_exhaustive()
    }
}

impl BookingConfig {
    /// Check the configuration before a session is started.
    pub fn validate(&self) -> ClaimResult<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(ClaimError::InvalidConfig(
                "username and password are required".to_string(),
            ));
        }
        if self.target_date.trim().is_empty() {
            return Err(ClaimError::InvalidConfig("target date is required".to_string()));
        }
        if self.attempt_group_size == 0 {
            return Err(ClaimError::InvalidConfig(
                "attempt group size must be at least 1".to_string(),
            ));
        }
        if self.success_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ClaimError::InvalidConfig(
                "at least one success marker is required".to_string(),
            ));
        }
        parse_offset(&self.utc_offset)?;
        Ok(())
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_minutes * 60)
    }

    /// The configured offset, or `+08:00` if it cannot be parsed.
    pub fn offset(&self) -> FixedOffset {
        parse_offset(&self.utc_offset).unwrap_or_else(|_| default_offset())
    }

    /// Password-free copy for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "***".to_string();
        }
        copy
    }
}

fn default_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Parse an offset written as `+HH:MM`, `-HH:MM` or `Z`.
pub fn parse_offset(input: &str) -> ClaimResult<FixedOffset> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    let (sign, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(ClaimError::InvalidConfig(format!(
            "invalid UTC offset '{input}', expected +HH:MM"
        )));
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours
        .parse()
        .map_err(|_| ClaimError::InvalidConfig(format!("invalid UTC offset '{input}'")))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| ClaimError::InvalidConfig(format!("invalid UTC offset '{input}'")))?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| ClaimError::InvalidConfig(format!("UTC offset out of range: '{input}'")))
}

/// Parse a release instant.
///
/// RFC 3339 input keeps its own offset; `YYYY-MM-DD HH:MM:SS` is read in
/// `offset`.
pub fn parse_release_instant(input: &str, offset: FixedOffset) -> ClaimResult<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, RELEASE_FORMAT).map_err(|e| {
        ClaimError::InvalidConfig(format!(
            "invalid release instant '{input}' ({e}); use YYYY-MM-DD HH:MM:SS"
        ))
    })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ClaimError::InvalidConfig(format!("ambiguous release instant '{input}'")))
}

/// Page locators. Values starting with `/` or `(` are XPath, others CSS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub username_input: String,
    pub password_input: String,
    pub captcha_image: String,
    pub captcha_input: String,
    pub login_button: String,
    pub notification_close: String,
    pub campus_option: String,
    pub facility_option: String,
    pub date_option: String,
    pub slot_row: String,
    /// Bookable slot control; looked up inside each row, so CSS.
    pub bookable_slot: String,
    pub submit_button: String,
    pub result_surface: String,
    pub result_dismiss: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            username_input: r#"//*[@id="username"]"#.to_string(),
            password_input: r#"//*[@id="password"]"#.to_string(),
            captcha_image: r#"//*[@id="captchaImg"]"#.to_string(),
            captcha_input: r#"//*[@id="captcha"]"#.to_string(),
            login_button: r#"//*[@id="fm1"]/section[2]/input[4]"#.to_string(),
            notification_close: "button.btn-close".to_string(),
            campus_option: r#"//*[@class="campus-name"]"#.to_string(),
            facility_option: r#"//*[@class="facility-name"]"#.to_string(),
            date_option: r#"//*[@class="date-number"]"#.to_string(),
            slot_row: "tr".to_string(),
            bookable_slot: "button.slot-btn.available".to_string(),
            submit_button: r#"//*[@class="btn btn-primary btn-large"]"#.to_string(),
            result_surface: ".modal-content".to_string(),
            result_dismiss: ".modal-content .btn-close".to_string(),
        }
    }
}

/// Fixed waits and cadences, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub lead_time_ms: u64,
    pub date_backoff_ms: u64,
    /// How long an earlier result dialog may take to close before a submit.
    pub result_clear_ms: u64,
    pub submit_wait_ms: u64,
    pub confirm_cadence_ms: u64,
    pub confirm_budget_ms: u64,
    pub result_wait_ms: u64,
    pub login_form_wait_ms: u64,
    pub captcha_wait_ms: u64,
    pub notification_wait_ms: u64,
    pub notification_retry_wait_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            lead_time_ms: 60_000,
            date_backoff_ms: 1_000,
            result_clear_ms: 3_000,
            submit_wait_ms: 10_000,
            confirm_cadence_ms: 125,
            confirm_budget_ms: 2_000,
            result_wait_ms: 5_000,
            login_form_wait_ms: 30_000,
            captcha_wait_ms: 10_000,
            notification_wait_ms: 10_000,
            notification_retry_wait_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn lead_time(&self) -> Duration {
        Duration::from_millis(self.lead_time_ms)
    }
    pub fn date_backoff(&self) -> Duration {
        Duration::from_millis(self.date_backoff_ms)
    }
    pub fn result_clear_wait(&self) -> Duration {
        Duration::from_millis(self.result_clear_ms)
    }
    pub fn submit_wait(&self) -> Duration {
        Duration::from_millis(self.submit_wait_ms)
    }
    pub fn confirm_cadence(&self) -> Duration {
        Duration::from_millis(self.confirm_cadence_ms.max(1))
    }
    pub fn confirm_budget(&self) -> Duration {
        Duration::from_millis(self.confirm_budget_ms)
    }
    pub fn result_wait(&self) -> Duration {
        Duration::from_millis(self.result_wait_ms)
    }
    pub fn login_form_wait(&self) -> Duration {
        Duration::from_millis(self.login_form_wait_ms)
    }
    pub fn captcha_wait(&self) -> Duration {
        Duration::from_millis(self.captcha_wait_ms)
    }
    pub fn notification_wait(&self) -> Duration {
        Duration::from_millis(self.notification_wait_ms)
    }
    pub fn notification_retry_wait(&self) -> Duration {
        Duration::from_millis(self.notification_retry_wait_ms)
    }
}

/// Inclusive millisecond range a random delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ms: 0, max_ms: 0 };

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }
}

/// Delay ranges for human-like interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanizeConfig {
    /// Between hovering and clicking, or clicking a field and typing.
    pub dwell: DelayRange,
    pub post_click: DelayRange,
    pub keystroke: DelayRange,
    /// After a page-level step (login, selecting an option).
    pub settle: DelayRange,
}

impl Default for HumanizeConfig {
    fn default() -> Self {
        Self {
            dwell: DelayRange::new(100, 300),
            post_click: DelayRange::new(200, 500),
            keystroke: DelayRange::new(50, 150),
            settle: DelayRange::new(2_000, 3_000),
        }
    }
}

impl HumanizeConfig {
    /// No waiting at all.
    pub fn instant() -> Self {
        Self {
            dwell: DelayRange::ZERO,
            post_click: DelayRange::ZERO,
            keystroke: DelayRange::ZERO,
            settle: DelayRange::ZERO,
        }
    }
}

//! Configuration loading and resolution.
//!
//! Later layers win: built-in defaults, the JSON config file, `.env` plus
//! `SLOTCLAIM_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use slotclaim::config::parse_release_instant;
use slotclaim::{BookingConfig, ClaimError};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SLOTCLAIM_CONFIG";

/// Prefix of every configuration environment variable.
pub const ENV_PREFIX: &str = "SLOTCLAIM_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to load .env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Invalid(#[from] ClaimError),
}

/// Booking configuration plus the settings only the binary needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub booking: BookingConfig,
    /// OCR service endpoint. The operator is prompted when unset.
    pub ocr_endpoint: Option<String>,
    /// Where the failure screenshot goes in debug mode.
    pub error_screenshot: PathBuf,
    /// Show the browser window.
    pub headed: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            booking: BookingConfig::default(),
            ocr_endpoint: None,
            error_screenshot: PathBuf::from("error_screenshot.png"),
            headed: false,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub campus: Option<String>,
    pub facility: Option<String>,
    pub date: Option<String>,
    pub time_slots: Vec<String>,
    pub release_at: Option<String>,
    pub grace_minutes: Option<u64>,
    pub utc_offset: Option<String>,
    pub ocr_endpoint: Option<String>,
    pub debug: bool,
    pub headed: bool,
}

impl AppConfig {
    /// Resolve every layer.
    ///
    /// Does not validate; callers decide when an incomplete config is fatal.
    pub fn load(
        explicit: Option<&Path>,
        env_file: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                load_file(&path)?
            }
            None => Self::default(),
        };

        if load_env_file(env_file)? {
            tracing::debug!("Loaded .env file");
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides)?;
        Ok(config)
    }

    /// Apply `SLOTCLAIM_*` variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = get("UTC_OFFSET") {
            self.booking.utc_offset = v;
        }
        if let Some(v) = get("USERNAME") {
            self.booking.username = v;
        }
        if let Some(v) = get("PASSWORD") {
            self.booking.password = v;
        }
        if let Some(v) = get("CAMPUS") {
            self.booking.campus_name = v;
        }
        if let Some(v) = get("FACILITY") {
            self.booking.facility_name = v;
        }
        if let Some(v) = get("DATE") {
            self.booking.target_date = v;
        }
        if let Some(v) = get("TIME_SLOTS") {
            self.booking.target_time_slots = split_list(&v);
        }
        if let Some(v) = get("RELEASE_AT") {
            self.booking.release_at = Some(parse_release_instant(&v, self.booking.offset())?);
        }
        if let Some(v) = get("GRACE_MINUTES") {
            self.booking.grace_minutes =
                v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}GRACE_MINUTES"),
                    value: v.clone(),
                })?;
        }
        if let Some(v) = get("OCR_ENDPOINT") {
            self.ocr_endpoint = Some(v);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, o: &Overrides) -> Result<(), ConfigError> {
        if let Some(v) = &o.utc_offset {
            self.booking.utc_offset = v.clone();
        }
        if let Some(v) = &o.username {
            self.booking.username = v.clone();
        }
        if let Some(v) = &o.password {
            self.booking.password = v.clone();
        }
        if let Some(v) = &o.campus {
            self.booking.campus_name = v.clone();
        }
        if let Some(v) = &o.facility {
            self.booking.facility_name = v.clone();
        }
        if let Some(v) = &o.date {
            self.booking.target_date = v.clone();
        }
        if !o.time_slots.is_empty() {
            self.booking.target_time_slots = o.time_slots.clone();
        }
        if let Some(v) = &o.release_at {
            self.booking.release_at = Some(parse_release_instant(v, self.booking.offset())?);
        }
        if let Some(v) = o.grace_minutes {
            self.booking.grace_minutes = v;
        }
        if let Some(v) = &o.ocr_endpoint {
            self.ocr_endpoint = Some(v.clone());
        }
        self.booking.debug |= o.debug;
        self.headed |= o.headed;
        Ok(())
    }
}

/// Resolve the config file path.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".slotclaim").join("config.json"))
}

pub fn load_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a `.env` file into the process environment. A missing file is not an error.
pub fn load_env_file(path: Option<&Path>) -> Result<bool, ConfigError> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|_| true),
        None => dotenvy::dotenv().map(|_| true),
    };
    loaded.or_else(|err| match err {
        dotenvy::Error::Io(_) => Ok(false),
        _ => Err(ConfigError::EnvFile(err)),
    })
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::io::Write;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let path = resolve_config_path(Some(Path::new("/tmp/booking.json")));
        assert_eq!(path, Some(PathBuf::from("/tmp/booking.json")));
    }

    #[test]
    fn test_load_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"username": "20231234", "target_date": "9-17", "timing": {{"date_backoff_ms": 500}}}}"#
        )
        .unwrap();

        let config = load_file(file.path()).unwrap();
        assert_eq!(config.booking.username, "20231234");
        assert_eq!(config.booking.target_date, "9-17");
        assert_eq!(config.booking.timing.date_backoff_ms, 500);
        assert_eq!(config.booking.timing.confirm_cadence_ms, 125);
        assert_eq!(config.booking.grace_minutes, 10);
        assert_eq!(config.error_screenshot, PathBuf::from("error_screenshot.png"));
    }

    #[test]
    fn test_load_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            load_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_file_missing_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(load_file(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_layer_overrides_file_values() {
        let mut config = AppConfig::default();
        config.booking.username = "from-file".into();
        config
            .apply_env(env(&[
                ("SLOTCLAIM_USERNAME", "from-env"),
                ("SLOTCLAIM_TIME_SLOTS", "20:00-21:00, 21:00-22:00,,"),
                ("SLOTCLAIM_RELEASE_AT", "2026-09-10 12:00:00"),
                ("SLOTCLAIM_GRACE_MINUTES", "15"),
            ]))
            .unwrap();

        assert_eq!(config.booking.username, "from-env");
        assert_eq!(
            config.booking.target_time_slots,
            vec!["20:00-21:00".to_string(), "21:00-22:00".to_string()]
        );
        // Naive instants are read at +08:00 by default.
        assert_eq!(config.booking.release_at, Some(utc("2026-09-10T04:00:00Z")));
        assert_eq!(config.booking.grace_minutes, 15);
    }

    #[test]
    fn test_env_offset_applies_before_release() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("SLOTCLAIM_RELEASE_AT", "2026-09-10 12:00:00"),
                ("SLOTCLAIM_UTC_OFFSET", "+00:00"),
            ]))
            .unwrap();
        assert_eq!(config.booking.release_at, Some(utc("2026-09-10T12:00:00Z")));
    }

    #[test]
    fn test_env_blank_values_are_ignored() {
        let mut config = AppConfig::default();
        config.booking.password = "kept".into();
        config.apply_env(env(&[("SLOTCLAIM_PASSWORD", "  ")])).unwrap();
        assert_eq!(config.booking.password, "kept");
    }

    #[test]
    fn test_env_bad_grace_minutes_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("SLOTCLAIM_GRACE_MINUTES", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_env_bad_release_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("SLOTCLAIM_RELEASE_AT", "tomorrow noon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ClaimError::InvalidConfig(_))));
    }

    #[test]
    fn test_flags_override_env() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("SLOTCLAIM_DATE", "9-16"),
                ("SLOTCLAIM_CAMPUS", "东校园"),
            ]))
            .unwrap();
        config
            .apply_overrides(&Overrides {
                date: Some("9-17".into()),
                release_at: Some("2026-09-10T12:00:00+08:00".into()),
                debug: true,
                headed: true,
                ..Overrides::default()
            })
            .unwrap();

        assert_eq!(config.booking.target_date, "9-17");
        assert_eq!(config.booking.campus_name, "东校园");
        assert_eq!(config.booking.release_at, Some(utc("2026-09-10T04:00:00Z")));
        assert!(config.booking.debug);
        assert!(config.headed);
    }

    #[test]
    fn test_env_file_is_loaded_into_process_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SLOTCLAIM_TEST_ENV_FILE_MARKER=loaded").unwrap();
        assert!(load_env_file(Some(file.path())).unwrap());
        assert_eq!(
            std::env::var("SLOTCLAIM_TEST_ENV_FILE_MARKER").as_deref(),
            Ok("loaded")
        );
    }

    #[test]
    fn test_missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env_file(Some(&dir.path().join(".env"))).unwrap());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a ,b,, "), vec!["a".to_string(), "b".to_string()]);
        assert!(split_list("").is_empty());
    }
}

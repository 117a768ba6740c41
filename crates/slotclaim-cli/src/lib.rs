//! slotclaim-cli: browser driver, captcha solvers and configuration for the `slotclaim` binary.

pub mod captcha;
pub mod config;
pub mod driver;
pub mod logging;
pub mod report;

pub use captcha::{normalize_captcha, ConfiguredSolver, HttpOcrSolver, PromptSolver};
pub use config::{AppConfig, Overrides};
pub use driver::chromium::{find_chromium, ChromiumBrowser, ChromiumPage};

//! slotclaim: deadline-bounded retry engine for claiming reservation slots.

pub mod classifier;
pub mod clock;
pub mod config;
pub mod events;
pub mod executor;
pub mod humanize;
pub mod orchestrator;
pub mod page;
pub mod poller;
pub mod pool;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use classifier::{Evidence, ResultClassifier, SurfaceSnapshot};
pub use clock::{Clock, Deadline, MonotonicClock, SystemClock};
pub use config::{BookingConfig, DelayRange, HumanizeConfig, Selectors, TimingConfig};
pub use events::{EventEmitter, EventReceiver, EventSender, SessionEvent, SessionEventKind};
pub use executor::{AttemptReport, BookingAttemptExecutor};
pub use humanize::Humanizer;
pub use orchestrator::{RetryOrchestrator, RunOutcome, RunReport};
pub use page::{CaptchaSolver, Page, ScreenshotTarget};
pub use poller::DatePoller;
pub use pool::{scan_slots, CandidatePool, ScannedSlot};
pub use scheduler::{WaitEvent, WaitScheduler};
pub use selector::{AttemptGroup, SlotSelector};
pub use state::SessionState;
pub use types::*;

//! Session progress events and their broadcast channel.
//!
//! The engine emits a [`SessionEvent`] at every state change, countdown tick
//! and attempt. Events flow through a `tokio::sync::broadcast` channel to any
//! subscriber (log writer, terminal display). With no subscriber they are
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{CandidateId, Outcome};

/// A progress event emitted during a session run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    pub kind: SessionEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEventKind {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// One per second while waiting for the start instant.
    CountdownTick { remaining_secs: u64 },
    /// The start instant had already passed when waiting began.
    LateStart { behind_secs: u64 },
    /// The target date was not offered on this scan.
    DatePollMiss { attempt: u32 },
    PoolBuilt { size: usize, filtered: bool },
    AttemptStarted {
        attempt: u32,
        candidates: Vec<CandidateId>,
    },
    AttemptClassified { attempt: u32, outcome: Outcome },
    CandidatesRemoved { remaining: usize },
    /// A non-fatal glitch that was absorbed.
    Warning { message: String },
}

/// Sender handle for session events.
pub type EventSender = tokio::sync::broadcast::Sender<SessionEvent>;

/// Receiver handle for session events.
pub type EventReceiver = tokio::sync::broadcast::Receiver<SessionEvent>;

/// Create a new event channel.
///
/// 512 events covers a full wait countdown plus a long retry run; slow
/// receivers lag rather than block the session.
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(512)
}

/// Stamps events with the run id and sequence number and sends them.
#[derive(Debug)]
pub struct EventEmitter {
    tx: Option<EventSender>,
    run_id: String,
    seq: AtomicU64,
}

impl EventEmitter {
    pub fn new(tx: Option<EventSender>, run_id: impl Into<String>) -> Self {
        Self {
            tx,
            run_id: run_id.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Emitter that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit an event, ignoring send errors (no receivers listening).
    pub fn emit(&self, kind: SessionEventKind) {
        if let Some(ref sender) = self.tx {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            let _ = sender.send(SessionEvent {
                run_id: self.run_id.clone(),
                seq,
                kind,
            });
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(SessionEventKind::Warning {
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent {
            run_id: "run-1".to_string(),
            seq: 3,
            kind: SessionEventKind::StateChanged {
                from: SessionState::AwaitingDate,
                to: SessionState::SelectingSlots,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StateChanged"));
        assert!(json.contains("awaiting_date"));

        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seq, 3);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let (tx, mut rx) = channel();
        let emitter = EventEmitter::new(Some(tx), "run-2");
        emitter.emit(SessionEventKind::CountdownTick { remaining_secs: 2 });
        emitter.emit(SessionEventKind::CountdownTick { remaining_secs: 1 });

        assert_eq!(rx.try_recv().unwrap().seq, 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.run_id, "run-2");
    }

    #[test]
    fn test_emit_without_receivers() {
        let (tx, rx) = channel();
        drop(rx);
        let emitter = EventEmitter::new(Some(tx), "run-3");
        emitter.warn("nobody listening");
    }

    #[test]
    fn test_disabled_emitter_is_noop() {
        EventEmitter::disabled().emit(SessionEventKind::LateStart { behind_secs: 4 });
    }
}

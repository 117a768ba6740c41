//! Core data types for candidates, attempt outcomes and the error taxonomy.

use serde::{Deserialize, Serialize};

/// Opaque handle to one element on the driven page.
///
/// Handles are issued by the [`Page`](crate::page::Page) implementation and
/// stay valid for as long as the underlying element does. Equality is
/// identity: two handles are equal only if they name the same element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// Stable identity of a candidate inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub u32);

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One bookable slot discovered on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub element: ElementHandle,
    /// Text of the table row the slot sits in (the time-slot label).
    pub row_label: String,
    /// Whether the slot was marked bookable when it was scanned.
    pub available: bool,
}

/// A rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Whether the point lies inside the rectangle (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// Result of classifying one booking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// No result surface and no success marker on the page.
    Unknown,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Fieldless discriminant of [`ClaimError`], for branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    ElementNotFound,
    DeadlineExceeded,
    CandidatePoolExhausted,
    NoCandidatesFound,
    Ocr,
    Navigation,
    InvalidConfig,
}

/// Errors that can occur while claiming a slot.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Candidate pool exhausted")]
    CandidatePoolExhausted,

    #[error("No candidates found: {0}")]
    NoCandidatesFound(String),

    #[error("Captcha recognition failed: {0}")]
    Ocr(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClaimError {
    /// Shorthand for [`ClaimError::ElementNotFound`].
    pub fn not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::CandidatePoolExhausted => ErrorKind::CandidatePoolExhausted,
            Self::NoCandidatesFound(_) => ErrorKind::NoCandidatesFound,
            Self::Ocr(_) => ErrorKind::Ocr,
            Self::Navigation(_) => ErrorKind::Navigation,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Expected end states of the algorithm rather than faults.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded | Self::CandidatePoolExhausted
        )
    }
}

/// Convenience result type.
pub type ClaimResult<T> = Result<T, ClaimError>;

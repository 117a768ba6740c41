//! Candidate discovery and the per-session candidate pool.

use std::collections::HashSet;

use crate::config::Selectors;
use crate::page::Page;
use crate::types::{Candidate, CandidateId, ClaimError, ClaimResult, ElementHandle};

/// A bookable slot as found on the page, before it joins a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedSlot {
    pub element: ElementHandle,
    pub row_label: String,
    pub available: bool,
}

/// Scan the page for bookable slots.
///
/// Slots are collected row by row so each carries its row's label. Bookable
/// controls outside any row are appended with an empty label.
pub async fn scan_slots<P: Page + ?Sized>(
    page: &P,
    selectors: &Selectors,
) -> ClaimResult<Vec<ScannedSlot>> {
    let mut seen = HashSet::new();
    let mut slots = Vec::new();

    let rows = page.find_all(&selectors.slot_row).await?;
    tracing::debug!("Scanning {} slot rows", rows.len());
    for row in rows {
        let buttons = page.find_all_within(row, &selectors.bookable_slot).await?;
        if buttons.is_empty() {
            continue;
        }
        let label = page.text_content(row).await?;
        for element in buttons {
            if seen.insert(element) {
                slots.push(ScannedSlot {
                    element,
                    row_label: label.trim().to_string(),
                    available: true,
                });
            }
        }
    }

    for element in page.find_all(&selectors.bookable_slot).await? {
        if seen.insert(element) {
            slots.push(ScannedSlot {
                element,
                row_label: String::new(),
                available: true,
            });
        }
    }

    Ok(slots)
}

/// The not-yet-tried candidates of one date-selection cycle.
///
/// Candidates live in an arena addressed by [`CandidateId`]; removal only
/// records the id, so ids stay valid and removed candidates never return.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    arena: Vec<Candidate>,
    removed: HashSet<CandidateId>,
    filtered: bool,
}

impl CandidatePool {
    /// Build a pool from a scan.
    ///
    /// Keeps only slots whose row label contains one of `time_slots` when any
    /// do, otherwise every available slot.
    pub fn build(scanned: Vec<ScannedSlot>, time_slots: &[String]) -> ClaimResult<Self> {
        let available: Vec<ScannedSlot> = scanned.into_iter().filter(|s| s.available).collect();
        if available.is_empty() {
            return Err(ClaimError::NoCandidatesFound(
                "no bookable slots on the page".to_string(),
            ));
        }

        let wanted: Vec<&str> = time_slots
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let (matching, rest): (Vec<_>, Vec<_>) = available
            .into_iter()
            .partition(|s| wanted.iter().any(|w| s.row_label.contains(w)));

        let filtered = !matching.is_empty();
        let chosen = if filtered {
            matching
        } else {
            if !wanted.is_empty() {
                tracing::info!(
                    "No bookable slot matches {:?}, falling back to all {} slots",
                    wanted,
                    rest.len()
                );
            }
            rest
        };

        let arena = chosen
            .into_iter()
            .enumerate()
            .map(|(i, s)| Candidate {
                id: CandidateId(i as u32),
                element: s.element,
                row_label: s.row_label,
                available: s.available,
            })
            .collect();

        Ok(Self {
            arena,
            removed: HashSet::new(),
            filtered,
        })
    }

    /// Number of candidates still eligible.
    pub fn len(&self) -> usize {
        self.arena.len() - self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the pool was narrowed to the configured time slots.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.get(id).is_some()
    }

    /// An eligible candidate by id.
    pub fn get(&self, id: CandidateId) -> Option<&Candidate> {
        if self.removed.contains(&id) {
            return None;
        }
        self.arena.get(id.0 as usize)
    }

    /// Eligible candidates in discovery order.
    pub fn remaining(&self) -> impl Iterator<Item = &Candidate> {
        self.arena.iter().filter(|c| !self.removed.contains(&c.id))
    }

    /// Blacklist candidates for the rest of the cycle. Returns how many were newly removed.
    pub fn remove<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = CandidateId>,
    {
        ids.into_iter()
            .filter(|id| (id.0 as usize) < self.arena.len())
            .filter(|id| self.removed.insert(*id))
            .count()
    }
}

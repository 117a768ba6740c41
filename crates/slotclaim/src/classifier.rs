//! Judging an attempt from the result surface or, failing that, the page.

use crate::config::BookingConfig;
use crate::page::Page;
use crate::types::{ClaimResult, ElementHandle, Outcome};

/// Result surfaces already on screen, with the text each one showed.
///
/// A surface only counts as a new result once its handle or its text differs
/// from every entry here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceSnapshot(Vec<(ElementHandle, String)>);

impl SurfaceSnapshot {
    /// Record every visible match of `selector`. Unreadable surfaces are skipped.
    pub async fn capture<P: Page + ?Sized>(page: &P, selector: &str) -> Self {
        let mut seen = Vec::new();
        if let Ok(found) = page.find_all(selector).await {
            for handle in found {
                if let Ok(text) = page.text_content(handle).await {
                    seen.push((handle, text));
                }
            }
        }
        Self(seen)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `handle` still shows what it showed when captured.
    pub fn is_leftover(&self, handle: ElementHandle, text: &str) -> bool {
        self.0.iter().any(|(h, t)| *h == handle && t == text)
    }
}

/// First match of `selector` that is not a leftover in `before`.
pub async fn fresh_surface<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    before: &SurfaceSnapshot,
) -> ClaimResult<Option<(ElementHandle, String)>> {
    for handle in page.find_all(selector).await? {
        let text = page.text_content(handle).await?;
        if !before.is_leftover(handle, &text) {
            return Ok(Some((handle, text)));
        }
    }
    Ok(None)
}

/// Text the verdict is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    /// Text of the result surface.
    Surface(String),
    /// Whole-page text, used when no result surface is present.
    Page(String),
}

/// Tri-state verdict on one attempt.
///
/// A present surface without a success marker is a definite `Failure`; a
/// missing surface can only ever yield `Success` or `Unknown`.
#[derive(Debug, Clone)]
pub struct ResultClassifier {
    result_selector: String,
    markers: Vec<String>,
}

impl ResultClassifier {
    pub fn new(result_selector: impl Into<String>, markers: Vec<String>) -> Self {
        let markers = markers.into_iter().filter(|m| !m.trim().is_empty()).collect();
        Self {
            result_selector: result_selector.into(),
            markers,
        }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(
            config.selectors.result_surface.clone(),
            config.success_markers.clone(),
        )
    }

    fn has_marker(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }

    pub fn judge(&self, evidence: &Evidence) -> Outcome {
        match evidence {
            Evidence::Surface(text) if self.has_marker(text) => Outcome::Success,
            Evidence::Surface(_) => Outcome::Failure,
            Evidence::Page(text) if self.has_marker(text) => Outcome::Success,
            Evidence::Page(_) => Outcome::Unknown,
        }
    }

    /// Collect evidence from the page.
    pub async fn gather<P: Page + ?Sized>(&self, page: &P) -> ClaimResult<Evidence> {
        self.gather_since(page, &SurfaceSnapshot::default()).await
    }

    /// Collect evidence, ignoring surfaces left over from before the submit.
    pub async fn gather_since<P: Page + ?Sized>(
        &self,
        page: &P,
        before: &SurfaceSnapshot,
    ) -> ClaimResult<Evidence> {
        match fresh_surface(page, &self.result_selector, before).await? {
            Some((_, text)) => Ok(Evidence::Surface(text)),
            None => Ok(Evidence::Page(page.page_text().await?)),
        }
    }

    pub async fn classify<P: Page + ?Sized>(&self, page: &P) -> ClaimResult<Outcome> {
        self.classify_since(page, &SurfaceSnapshot::default()).await
    }

    /// Verdict on the attempt submitted after `before` was captured.
    pub async fn classify_since<P: Page + ?Sized>(
        &self,
        page: &P,
        before: &SurfaceSnapshot,
    ) -> ClaimResult<Outcome> {
        let evidence = self.gather_since(page, before).await?;
        match &evidence {
            Evidence::Surface(text) => tracing::info!("Result surface: {}", text.trim()),
            Evidence::Page(text) => tracing::debug!("No result surface, page text: {}", text.trim()),
        }
        Ok(self.judge(&evidence))
    }
}

//! Collaborator interfaces: the driven page and the captcha recognizer.
//!
//! The engine never touches a browser directly. It drives one [`Page`]
//! serially and hands captcha screenshots to a [`CaptchaSolver`].

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{ClaimError, ClaimResult, ElementHandle, Rect};

/// How often [`Page::find`] re-scans while waiting.
pub const FIND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to capture with [`Page::screenshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotTarget {
    FullPage,
    Element(ElementHandle),
}

/// A single live page that can be inspected and acted on.
#[async_trait]
pub trait Page: Send + Sync {
    /// Load a URL and wait for it to settle.
    async fn navigate(&self, url: &str) -> ClaimResult<()>;

    /// Full refresh of the current page. Invalidates earlier handles.
    async fn reload(&self) -> ClaimResult<()>;

    /// All currently matching elements, in document order.
    async fn find_all(&self, selector: &str) -> ClaimResult<Vec<ElementHandle>>;

    /// Matching descendants of `scope`.
    async fn find_all_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> ClaimResult<Vec<ElementHandle>>;

    /// First matching element, waiting up to `timeout` for one to appear.
    async fn find(&self, selector: &str, timeout: Duration) -> ClaimResult<ElementHandle> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(found) = self.find_all(selector).await?.into_iter().next() {
                return Ok(found);
            }
            if started.elapsed() >= timeout {
                return Err(ClaimError::not_found(selector));
            }
            tokio::time::sleep(FIND_POLL_INTERVAL).await;
        }
    }

    async fn click(&self, element: ElementHandle) -> ClaimResult<()>;

    /// Mouse click at page coordinates.
    async fn click_at(&self, x: f64, y: f64) -> ClaimResult<()>;

    async fn hover(&self, element: ElementHandle) -> ClaimResult<()>;

    /// Type text into a focused input.
    async fn type_text(&self, element: ElementHandle, text: &str) -> ClaimResult<()>;

    /// Layout box, or `None` if the element is not rendered.
    async fn bounding_box(&self, element: ElementHandle) -> ClaimResult<Option<Rect>>;

    async fn text_content(&self, element: ElementHandle) -> ClaimResult<String>;

    /// Visible text of the whole page.
    async fn page_text(&self) -> ClaimResult<String>;

    /// PNG bytes of the target.
    async fn screenshot(&self, target: ScreenshotTarget) -> ClaimResult<Vec<u8>>;
}

/// Turns a captcha image into its text.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn classify(&self, image: &[u8]) -> ClaimResult<String>;
}

#[async_trait]
impl<T: Page + ?Sized> Page for &T {
    async fn navigate(&self, url: &str) -> ClaimResult<()> {
        (**self).navigate(url).await
    }
    async fn reload(&self) -> ClaimResult<()> {
        (**self).reload().await
    }
    async fn find_all(&self, selector: &str) -> ClaimResult<Vec<ElementHandle>> {
        (**self).find_all(selector).await
    }
    async fn find_all_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> ClaimResult<Vec<ElementHandle>> {
        (**self).find_all_within(scope, selector).await
    }
    async fn find(&self, selector: &str, timeout: Duration) -> ClaimResult<ElementHandle> {
        (**self).find(selector, timeout).await
    }
    async fn click(&self, element: ElementHandle) -> ClaimResult<()> {
        (**self).click(element).await
    }
    async fn click_at(&self, x: f64, y: f64) -> ClaimResult<()> {
        (**self).click_at(x, y).await
    }
    async fn hover(&self, element: ElementHandle) -> ClaimResult<()> {
        (**self).hover(element).await
    }
    async fn type_text(&self, element: ElementHandle, text: &str) -> ClaimResult<()> {
        (**self).type_text(element, text).await
    }
    async fn bounding_box(&self, element: ElementHandle) -> ClaimResult<Option<Rect>> {
        (**self).bounding_box(element).await
    }
    async fn text_content(&self, element: ElementHandle) -> ClaimResult<String> {
        (**self).text_content(element).await
    }
    async fn page_text(&self) -> ClaimResult<String> {
        (**self).page_text().await
    }
    async fn screenshot(&self, target: ScreenshotTarget) -> ClaimResult<Vec<u8>> {
        (**self).screenshot(target).await
    }
}

/// Whether at least one element matches right now. Lookup errors count as absent.
pub async fn is_present<P: Page + ?Sized>(page: &P, selector: &str) -> bool {
    match page.find_all(selector).await {
        Ok(found) => !found.is_empty(),
        Err(e) => {
            tracing::debug!("Presence check for {selector} failed: {e}");
            false
        }
    }
}

/// First option whose text contains `name`, with that text.
pub async fn find_option_containing<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    name: &str,
) -> ClaimResult<Option<(ElementHandle, String)>> {
    for option in page.find_all(selector).await? {
        let text = page.text_content(option).await?;
        if text.contains(name) {
            return Ok(Some((option, text)));
        }
    }
    Ok(None)
}

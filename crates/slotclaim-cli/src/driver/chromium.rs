//! Chromium-backed [`Page`] using chromiumoxide.
//!
//! Matching elements are tagged with a `data-slotclaim-id` attribute when
//! first seen; the tag value is the [`ElementHandle`]. Tags are allocated
//! from a per-document base. The first query on any new document, whether
//! loaded by the driver, a form post or a link, moves to a fresh base, so
//! handles from an earlier document never resolve to a new element.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;

use slotclaim::{ClaimError, ClaimResult, ElementHandle, Page, Rect, ScreenshotTarget};

use super::is_xpath;

/// Attribute carrying the element handle.
const HANDLE_ATTR: &str = "data-slotclaim-id";

/// Handle space reserved per loaded document.
const HANDLES_PER_DOCUMENT: u64 = 1_000_000;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. SLOTCLAIM_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("SLOTCLAIM_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// A launched Chromium instance.
pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Launch Chromium, headless unless `headed`.
    pub async fn launch(headed: bool) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Install Chrome or set SLOTCLAIM_CHROMIUM_PATH.")?;
        tracing::info!("Launching {}", chrome_path.display());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1280, 900)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled");
        if headed {
            builder = builder.with_head();
        } else {
            builder = builder.arg("--headless=new");
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler: {e}");
                }
            }
        });

        Ok(Self { browser, handler })
    }

    pub async fn new_page(&self) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        Ok(ChromiumPage::new(page))
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await.context("failed to close Chromium")?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

/// One browser tab driven through the [`Page`] trait.
pub struct ChromiumPage {
    page: chromiumoxide::Page,
    document: AtomicU64,
}

/// Answer of the in-page query script.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum QueryReply {
    /// The document has no handle counter yet.
    Fresh,
    MissingScope,
    Found { ids: Vec<u64> },
}

/// Script tagging the visible matches of `selector`.
///
/// Without `claim`, an untagged document answers `fresh` and nothing is
/// tagged; with it, the document's counter starts at `base + 1`.
fn query_script(
    base: u64,
    scope: Option<ElementHandle>,
    selector: &str,
    claim: bool,
) -> ClaimResult<String> {
    let scope_js = match scope {
        Some(h) => h.0.to_string(),
        None => "null".to_string(),
    };
    let selector_js = serde_json::to_string(selector).map_err(nav_err)?;

    Ok(format!(
        r#"(() => {{
  if (window.__slotclaimNext === undefined) {{
    if (!{claim}) return {{ status: 'fresh' }};
    window.__slotclaimNext = {base} + 1;
  }}
  const scopeId = {scope_js};
  const root = scopeId === null ? document : document.querySelector('[{HANDLE_ATTR}="' + scopeId + '"]');
  if (!root) return {{ status: 'missing_scope' }};
  const sel = {selector_js};
  let found = [];
  if ({xpath}) {{
    const snap = document.evaluate(sel, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < snap.snapshotLength; i++) found.push(snap.snapshotItem(i));
  }} else {{
    found = Array.from(root.querySelectorAll(sel));
  }}
  const ids = found
    .filter(el => el instanceof Element && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length))
    .map(el => {{
      if (!el.hasAttribute('{HANDLE_ATTR}')) el.setAttribute('{HANDLE_ATTR}', String(window.__slotclaimNext++));
      return Number(el.getAttribute('{HANDLE_ATTR}'));
    }});
  return {{ status: 'found', ids }};
}})()"#,
        xpath = is_xpath(selector),
    ))
}

fn nav_err(e: impl std::fmt::Display) -> ClaimError {
    ClaimError::Navigation(e.to_string())
}

impl ChromiumPage {
    pub fn new(page: chromiumoxide::Page) -> Self {
        Self {
            page,
            document: AtomicU64::new(1),
        }
    }

    /// Visible matches of `selector` under `scope`, tagged with handles.
    ///
    /// Returns `None` when `scope` no longer resolves. A document the driver
    /// has not tagged yet gets a fresh handle base first, whoever loaded it.
    async fn query(
        &self,
        scope: Option<ElementHandle>,
        selector: &str,
    ) -> ClaimResult<Option<Vec<ElementHandle>>> {
        let base = self.document.load(Ordering::SeqCst) * HANDLES_PER_DOCUMENT;
        let reply = match self.run_query(base, scope, selector, false).await? {
            QueryReply::Fresh => {
                let document = self.document.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!("New document detected, handle base {document}");
                self.run_query(document * HANDLES_PER_DOCUMENT, scope, selector, true)
                    .await?
            }
            reply => reply,
        };
        match reply {
            QueryReply::Found { ids } => Ok(Some(ids.into_iter().map(ElementHandle).collect())),
            QueryReply::MissingScope => Ok(None),
            QueryReply::Fresh => Err(ClaimError::Navigation(format!(
                "query {selector} ran on an untagged document twice"
            ))),
        }
    }

    async fn run_query(
        &self,
        base: u64,
        scope: Option<ElementHandle>,
        selector: &str,
        claim: bool,
    ) -> ClaimResult<QueryReply> {
        let script = query_script(base, scope, selector, claim)?;
        self.page
            .evaluate(script)
            .await
            .map_err(|e| ClaimError::Navigation(format!("query {selector} failed: {e}")))?
            .into_value()
            .map_err(|e| ClaimError::Navigation(format!("bad query result for {selector}: {e:?}")))
    }

    async fn element(&self, handle: ElementHandle) -> ClaimResult<Element> {
        self.page
            .find_element(format!("[{HANDLE_ATTR}=\"{}\"]", handle.0))
            .await
            .map_err(|_| ClaimError::not_found(format!("element {}", handle.0)))
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn navigate(&self, url: &str) -> ClaimResult<()> {
        self.page.goto(url).await.map_err(nav_err)?;
        let _ = self.page.wait_for_navigation().await;
        Ok(())
    }

    async fn reload(&self) -> ClaimResult<()> {
        self.page.reload().await.map_err(nav_err)?;
        let _ = self.page.wait_for_navigation().await;
        Ok(())
    }

    async fn find_all(&self, selector: &str) -> ClaimResult<Vec<ElementHandle>> {
        Ok(self.query(None, selector).await?.unwrap_or_default())
    }

    async fn find_all_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> ClaimResult<Vec<ElementHandle>> {
        self.query(Some(scope), selector)
            .await?
            .ok_or_else(|| ClaimError::not_found(format!("element {}", scope.0)))
    }

    async fn click(&self, element: ElementHandle) -> ClaimResult<()> {
        let el = self.element(element).await?;
        el.scroll_into_view().await.map_err(nav_err)?;
        el.click().await.map_err(nav_err)?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> ClaimResult<()> {
        self.page.click(Point::new(x, y)).await.map_err(nav_err)?;
        Ok(())
    }

    async fn hover(&self, element: ElementHandle) -> ClaimResult<()> {
        self.element(element)
            .await?
            .hover()
            .await
            .map_err(nav_err)?;
        Ok(())
    }

    async fn type_text(&self, element: ElementHandle, text: &str) -> ClaimResult<()> {
        let el = self.element(element).await?;
        el.focus().await.map_err(nav_err)?;
        el.type_str(text).await.map_err(nav_err)?;
        Ok(())
    }

    async fn bounding_box(&self, element: ElementHandle) -> ClaimResult<Option<Rect>> {
        let el = self.element(element).await?;
        if let Err(e) = el.scroll_into_view().await {
            tracing::debug!("Could not scroll element {} into view: {e}", element.0);
        }
        match el.bounding_box().await {
            Ok(b) if b.width > 0.0 && b.height > 0.0 => Ok(Some(Rect {
                x: b.x,
                y: b.y,
                width: b.width,
                height: b.height,
            })),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!("No box for element {}: {e}", element.0);
                Ok(None)
            }
        }
    }

    async fn text_content(&self, element: ElementHandle) -> ClaimResult<String> {
        let text = self
            .element(element)
            .await?
            .inner_text()
            .await
            .map_err(nav_err)?;
        Ok(text.unwrap_or_default())
    }

    async fn page_text(&self) -> ClaimResult<String> {
        self.page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(nav_err)?
            .into_value()
            .map_err(|e| ClaimError::Navigation(format!("bad page text: {e:?}")))
    }

    async fn screenshot(&self, target: ScreenshotTarget) -> ClaimResult<Vec<u8>> {
        match target {
            ScreenshotTarget::FullPage => self
                .page
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .full_page(true)
                        .build(),
                )
                .await
                .map_err(nav_err),
            ScreenshotTarget::Element(handle) => self
                .element(handle)
                .await?
                .screenshot(CaptureScreenshotFormat::Png)
                .await
                .map_err(nav_err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_reply_shapes() {
        let fresh: QueryReply = serde_json::from_str(r#"{"status":"fresh"}"#).unwrap();
        assert_eq!(fresh, QueryReply::Fresh);
        let missing: QueryReply = serde_json::from_str(r#"{"status":"missing_scope"}"#).unwrap();
        assert_eq!(missing, QueryReply::MissingScope);
        let found: QueryReply =
            serde_json::from_str(r#"{"status":"found","ids":[2000001,2000002]}"#).unwrap();
        assert_eq!(found, QueryReply::Found { ids: vec![2_000_001, 2_000_002] });
    }

    #[test]
    fn test_untagged_document_is_only_claimed_on_request() {
        let unclaimed = query_script(3 * HANDLES_PER_DOCUMENT, None, "tr", false).unwrap();
        assert!(unclaimed.contains("if (!false) return { status: 'fresh' };"));
        let claim = query_script(3 * HANDLES_PER_DOCUMENT, None, "tr", true).unwrap();
        assert!(claim.contains("if (!true) return { status: 'fresh' };"));
        assert!(claim.contains("window.__slotclaimNext = 3000000 + 1;"));
    }

    #[test]
    fn test_query_script_escapes_selector() {
        let script = query_script(HANDLES_PER_DOCUMENT, Some(ElementHandle(7)), "//td[.='a\"b']", true)
            .unwrap();
        assert!(script.contains(r#"const sel = "//td[.='a\"b']";"#));
        assert!(script.contains("const scopeId = 7;"));
        assert!(script.contains("if (true) {"));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_find_click_and_read() {
        let browser = ChromiumBrowser::launch(false)
            .await
            .expect("failed to launch Chromium");
        let page = browser.new_page().await.expect("failed to open page");

        page.navigate(
            "data:text/html,<table><tr><td>21:00-22:00</td><td><button class='slot'>A</button></td></tr></table>\
             <div id='hidden' style='display:none'>x</div>\
             <button id='go' onclick=\"document.body.insertAdjacentHTML('beforeend','<p>预约成功</p>')\">go</button>",
        )
        .await
        .expect("navigation failed");

        let rows = page.find_all("tr").await.unwrap();
        assert_eq!(rows.len(), 1);
        let buttons = page.find_all_within(rows[0], "button.slot").await.unwrap();
        assert_eq!(buttons.len(), 1);
        assert_eq!(page.text_content(buttons[0]).await.unwrap(), "A");

        assert!(page.find_all("#hidden").await.unwrap().is_empty());
        assert_eq!(page.find_all("//button[@id='go']").await.unwrap().len(), 1);

        let go = page.find_all("#go").await.unwrap()[0];
        assert!(page.bounding_box(go).await.unwrap().is_some());
        page.click(go).await.unwrap();
        assert!(page.page_text().await.unwrap().contains("预约成功"));

        page.reload().await.unwrap();
        assert!(page.click(go).await.is_err());

        // A document loaded by the page itself gets a fresh handle base too.
        page.navigate(
            "data:text/html,<a id='next' href=\"data:text/html,<a id='next'>again</a>\">next</a>",
        )
        .await
        .expect("navigation failed");
        let before = page.find_all("#next").await.unwrap()[0];
        page.click(before).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let after = page.find_all("#next").await.unwrap()[0];
        assert_ne!(before, after);
        assert!(after.0 / HANDLES_PER_DOCUMENT > before.0 / HANDLES_PER_DOCUMENT);

        browser.close().await.expect("close failed");
    }
}

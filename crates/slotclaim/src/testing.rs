//! Scripted in-memory page for tests.
//!
//! Elements are matched by a single selector token and laid out on a grid so
//! every element has a distinct bounding box. Hooks attached to clicks and
//! reloads mutate the [`Scene`] to simulate the site reacting.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::page::{CaptchaSolver, Page, ScreenshotTarget};
use crate::types::{ClaimError, ClaimResult, ElementHandle, Rect};

/// Reaction to a click or reload.
pub type SceneHook = Box<dyn FnMut(&mut Scene) + Send>;

#[derive(Debug)]
struct FakeElement {
    selector: String,
    text: String,
    parent: Option<ElementHandle>,
    visible: bool,
    rendered: bool,
    /// The next hover or click fails as if the node had been replaced.
    detached: bool,
    rect: Rect,
    clicks: usize,
    hovers: usize,
    typed: String,
}

/// Mutable state behind a [`ScriptedPage`].
#[derive(Default)]
pub struct Scene {
    elements: Vec<FakeElement>,
    page_text: String,
    screenshot: Vec<u8>,
    reloads: usize,
    point_clicks: usize,
    navigations: Vec<String>,
    scans: HashMap<String, usize>,
    click_hooks: HashMap<ElementHandle, SceneHook>,
    reload_hooks: Vec<SceneHook>,
}

impl Scene {
    fn insert(&mut self, selector: &str, text: &str, parent: Option<ElementHandle>, visible: bool) -> ElementHandle {
        let index = self.elements.len();
        self.elements.push(FakeElement {
            selector: selector.to_string(),
            text: text.to_string(),
            parent,
            visible,
            rendered: true,
            detached: false,
            rect: Rect {
                x: (index % 10) as f64 * 100.0,
                y: (index / 10) as f64 * 50.0,
                width: 80.0,
                height: 30.0,
            },
            clicks: 0,
            hovers: 0,
            typed: String::new(),
        });
        ElementHandle(index as u64)
    }

    fn get(&self, handle: ElementHandle) -> Option<&FakeElement> {
        self.elements.get(handle.0 as usize)
    }

    fn get_mut(&mut self, handle: ElementHandle) -> Option<&mut FakeElement> {
        self.elements.get_mut(handle.0 as usize)
    }

    pub fn add(&mut self, selector: &str, text: &str) -> ElementHandle {
        self.insert(selector, text, None, true)
    }

    pub fn show(&mut self, handle: ElementHandle) {
        if let Some(el) = self.get_mut(handle) {
            el.visible = true;
        }
    }

    pub fn hide(&mut self, handle: ElementHandle) {
        if let Some(el) = self.get_mut(handle) {
            el.visible = false;
        }
    }

    pub fn is_visible(&self, handle: ElementHandle) -> bool {
        self.get(handle).is_some_and(|el| el.visible)
    }

    pub fn set_text(&mut self, handle: ElementHandle, text: &str) {
        if let Some(el) = self.get_mut(handle) {
            el.text = text.to_string();
        }
    }

    /// Make the element report no bounding box.
    pub fn set_unrendered(&mut self, handle: ElementHandle) {
        if let Some(el) = self.get_mut(handle) {
            el.rendered = false;
        }
    }

    /// Fail the next hover or click on the element, then recover.
    pub fn detach_once(&mut self, handle: ElementHandle) {
        if let Some(el) = self.get_mut(handle) {
            el.detached = true;
        }
    }

    /// Consume a pending detach.
    fn take_detached(&mut self, handle: ElementHandle) -> bool {
        self.get_mut(handle)
            .is_some_and(|el| std::mem::replace(&mut el.detached, false))
    }

    pub fn set_page_text(&mut self, text: &str) {
        self.page_text = text.to_string();
    }

    pub fn set_screenshot(&mut self, bytes: Vec<u8>) {
        self.screenshot = bytes;
    }

    pub fn clicks(&self, handle: ElementHandle) -> usize {
        self.get(handle).map_or(0, |el| el.clicks)
    }

    pub fn reloads(&self) -> usize {
        self.reloads
    }

    fn register_click(&mut self, handle: ElementHandle) {
        if let Some(el) = self.get_mut(handle) {
            el.clicks += 1;
        }
        if let Some(mut hook) = self.click_hooks.remove(&handle) {
            hook(self);
            self.click_hooks.entry(handle).or_insert(hook);
        }
    }

    fn visible_matching(&self, selector: &str, parent: Option<ElementHandle>) -> Vec<ElementHandle> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, el)| el.visible && el.selector == selector)
            .filter(|(_, el)| parent.is_none() || el.parent == parent)
            .map(|(i, _)| ElementHandle(i as u64))
            .collect()
    }
}

/// In-memory [`Page`] whose behavior is scripted by the test.
#[derive(Default)]
pub struct ScriptedPage {
    scene: Mutex<Scene>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the scene.
    pub fn scene<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> R {
        let mut scene = self.scene.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut scene)
    }

    pub fn add(&self, selector: &str, text: &str) -> ElementHandle {
        self.scene(|s| s.insert(selector, text, None, true))
    }

    pub fn add_hidden(&self, selector: &str, text: &str) -> ElementHandle {
        self.scene(|s| s.insert(selector, text, None, false))
    }

    pub fn add_child(&self, parent: ElementHandle, selector: &str, text: &str) -> ElementHandle {
        self.scene(|s| s.insert(selector, text, Some(parent), true))
    }

    /// Run `hook` every time `handle` is clicked.
    pub fn on_click(&self, handle: ElementHandle, hook: impl FnMut(&mut Scene) + Send + 'static) {
        self.scene(|s| {
            s.click_hooks.insert(handle, Box::new(hook));
        });
    }

    /// Run `hook` after every reload.
    pub fn on_reload(&self, hook: impl FnMut(&mut Scene) + Send + 'static) {
        self.scene(|s| s.reload_hooks.push(Box::new(hook)));
    }

    pub fn clicks(&self, handle: ElementHandle) -> usize {
        self.scene(|s| s.clicks(handle))
    }

    pub fn hovers(&self, handle: ElementHandle) -> usize {
        self.scene(|s| s.get(handle).map_or(0, |el| el.hovers))
    }

    pub fn typed(&self, handle: ElementHandle) -> String {
        self.scene(|s| s.get(handle).map(|el| el.typed.clone()).unwrap_or_default())
    }

    pub fn point_clicks(&self) -> usize {
        self.scene(|s| s.point_clicks)
    }

    pub fn reloads(&self) -> usize {
        self.scene(|s| s.reloads)
    }

    /// How many times `selector` was queried page-wide.
    pub fn scans(&self, selector: &str) -> usize {
        self.scene(|s| s.scans.get(selector).copied().unwrap_or(0))
    }

    pub fn navigations(&self) -> Vec<String> {
        self.scene(|s| s.navigations.clone())
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn navigate(&self, url: &str) -> ClaimResult<()> {
        self.scene(|s| s.navigations.push(url.to_string()));
        Ok(())
    }

    async fn reload(&self) -> ClaimResult<()> {
        self.scene(|s| {
            s.reloads += 1;
            let mut hooks = std::mem::take(&mut s.reload_hooks);
            for hook in hooks.iter_mut() {
                hook(s);
            }
            hooks.append(&mut s.reload_hooks);
            s.reload_hooks = hooks;
        });
        Ok(())
    }

    async fn find_all(&self, selector: &str) -> ClaimResult<Vec<ElementHandle>> {
        Ok(self.scene(|s| {
            *s.scans.entry(selector.to_string()).or_default() += 1;
            s.visible_matching(selector, None)
        }))
    }

    async fn find_all_within(
        &self,
        scope: ElementHandle,
        selector: &str,
    ) -> ClaimResult<Vec<ElementHandle>> {
        Ok(self.scene(|s| s.visible_matching(selector, Some(scope))))
    }

    async fn click(&self, element: ElementHandle) -> ClaimResult<()> {
        self.scene(|s| {
            if !s.is_visible(element) || s.take_detached(element) {
                return Err(ClaimError::not_found(format!("element {}", element.0)));
            }
            s.register_click(element);
            Ok(())
        })
    }

    async fn click_at(&self, x: f64, y: f64) -> ClaimResult<()> {
        self.scene(|s| {
            s.point_clicks += 1;
            let hit = s
                .elements
                .iter()
                .position(|el| el.visible && el.rendered && el.rect.contains(x, y));
            if let Some(index) = hit {
                s.register_click(ElementHandle(index as u64));
            }
        });
        Ok(())
    }

    async fn hover(&self, element: ElementHandle) -> ClaimResult<()> {
        self.scene(|s| {
            if s.take_detached(element) {
                return Err(ClaimError::not_found(format!("element {}", element.0)));
            }
            match s.get_mut(element) {
                Some(el) => {
                    el.hovers += 1;
                    Ok(())
                }
                None => Err(ClaimError::not_found(format!("element {}", element.0))),
            }
        })
    }

    async fn type_text(&self, element: ElementHandle, text: &str) -> ClaimResult<()> {
        self.scene(|s| match s.get_mut(element) {
            Some(el) => {
                el.typed.push_str(text);
                Ok(())
            }
            None => Err(ClaimError::not_found(format!("element {}", element.0))),
        })
    }

    async fn bounding_box(&self, element: ElementHandle) -> ClaimResult<Option<Rect>> {
        Ok(self.scene(|s| s.get(element).filter(|el| el.rendered).map(|el| el.rect)))
    }

    async fn text_content(&self, element: ElementHandle) -> ClaimResult<String> {
        self.scene(|s| {
            s.get(element)
                .map(|el| el.text.clone())
                .ok_or_else(|| ClaimError::not_found(format!("element {}", element.0)))
        })
    }

    async fn page_text(&self) -> ClaimResult<String> {
        Ok(self.scene(|s| s.page_text.clone()))
    }

    async fn screenshot(&self, _target: ScreenshotTarget) -> ClaimResult<Vec<u8>> {
        Ok(self.scene(|s| s.screenshot.clone()))
    }
}

/// Captcha solver that always answers with a fixed text.
#[derive(Debug, Clone)]
pub struct FixedSolver(pub String);

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn classify(&self, _image: &[u8]) -> ClaimResult<String> {
        Ok(self.0.clone())
    }
}

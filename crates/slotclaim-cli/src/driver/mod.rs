//! Page drivers for real browsers.

pub mod chromium;

/// Locators starting with `/` or `(` are XPath; everything else is CSS.
pub fn is_xpath(selector: &str) -> bool {
    let s = selector.trim_start();
    s.starts_with('/') || s.starts_with('(')
}

//! Default `PageProbe` wiring for the binary.
//!
//! The in-page DOM evaluation that detects specific ad libraries (Prebid.js
//! global variables, modules, adapter versions) is pluggable rather than
//! built in here. `PlaceholderProbe` is the minimal stand-in that lets the
//! pipeline run end-to-end without claiming to implement that detection
//! logic — it confirms the page loaded and returns an empty extraction. A
//! real deployment swaps in its own `PageProbe` implementation.

use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::Tab;
use prebid_monitor_core::{CrawlError, PageData, PageProbe};

pub struct PlaceholderProbe;

#[async_trait]
impl PageProbe for PlaceholderProbe {
    async fn probe(&self, tab: &Tab, url: &str, _timeout: Duration) -> Result<PageData, CrawlError> {
        // A real probe evaluates the page's DOM/globals here. This stand-in
        // only confirms the tab is still alive post-navigation.
        tab.evaluate("document.readyState", false)
            .map_err(|e| CrawlError::Browser(e.to_string()))?;

        Ok(PageData {
            url: url.to_string(),
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            libraries: Vec::new(),
            prebid_instances: Vec::new(),
        })
    }
}

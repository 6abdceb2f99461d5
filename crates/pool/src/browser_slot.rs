//! Managed browser instances. `BrowserSlot` is one entry of a rotation: a
//! browser is retired and dropped from rotation once it has accumulated
//! too many page-level errors, or once its connection no longer responds.

use std::ffi::OsString;
use std::path::PathBuf;

use headless_chrome::{Browser, LaunchOptionsBuilder};
use prebid_monitor_core::CrawlError;
use tracing::info;

pub struct BrowserSlot {
    pub browser: Browser,
    pub page_count: usize,
    pub error_count: u32,
}

impl BrowserSlot {
    pub fn launch(headless: bool) -> Result<Self, CrawlError> {
        let extra_args: Vec<OsString> = vec![
            OsString::from("--no-sandbox"),
            OsString::from("--disable-dev-shm-usage"),
            OsString::from("--disable-gpu"),
        ];

        let mut builder = LaunchOptionsBuilder::default();
        builder
            .headless(headless)
            .window_size(Some((1920, 1080)))
            .args(extra_args.iter().map(|a| a.as_ref()).collect());

        if let Ok(chrome_path) = std::env::var("CHROME_PATH") {
            builder.path(Some(PathBuf::from(chrome_path)));
        }

        let launch_options = builder
            .build()
            .map_err(|e| CrawlError::Browser(format!("building launch options: {e}")))?;

        let browser = Browser::new(launch_options).map_err(|e| CrawlError::Browser(e.to_string()))?;

        Ok(Self {
            browser,
            page_count: 0,
            error_count: 0,
        })
    }

    /// Whether this slot should be retired and dropped from rotation:
    /// either its error count has crossed the threshold, or its health
    /// check fails outright.
    pub fn should_retire(&self, error_threshold: u32) -> bool {
        if self.error_count >= error_threshold {
            return true;
        }
        self.browser.get_tabs().lock().is_err()
    }

    pub fn record_success(&mut self) {
        self.page_count = self.page_count.saturating_sub(1);
    }

    pub fn record_error(&mut self) {
        self.page_count = self.page_count.saturating_sub(1);
        self.error_count += 1;
    }
}

impl Drop for BrowserSlot {
    fn drop(&mut self) {
        info!(error_count = self.error_count, "retiring browser from rotation");
    }
}

//! Worker Pool: owns browser instances and pages, drives the Page Probe
//! against a URL with bounded resources, strict timeouts, and structured
//! error classification. Browsers are managed as a rotation of slots
//! rather than one long-lived instance; causes are collapsed down to a
//! single classification table in `classify.rs`.

mod browser_slot;
pub mod classify;
pub mod page_state;

use std::sync::Arc;
use std::time::Duration;

use prebid_monitor_core::{CrawlError, Outcome, PageProbe};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{info, warn};

use browser_slot::BrowserSlot;
use page_state::{PageEvent, PageMachine, PageState};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub max_pages_per_browser: usize,
    pub error_threshold: u32,
    pub acquire_timeout: Duration,
    pub navigation_timeout: Duration,
    pub probe_timeout: Duration,
    pub task_timeout: Duration,
    pub headless: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_pages_per_browser: 50,
            error_threshold: 5,
            acquire_timeout: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(120),
            headless: true,
        }
    }
}

/// Owns the browser rotation and gates in-flight pages behind a
/// semaphore sized to `max_concurrency`. New pages are created lazily;
/// when every browser is saturated, `process` blocks cooperatively until
/// capacity is released.
pub struct WorkerPool {
    config: PoolConfig,
    probe: Arc<dyn PageProbe>,
    browsers: Mutex<Vec<BrowserSlot>>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, probe: Arc<dyn PageProbe>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            config,
            probe,
            browsers: Mutex::new(Vec::new()),
            semaphore,
        }
    }

    /// Run the full per-URL lifecycle: `Queued -> Acquiring -> Navigating
    /// -> Probing -> Emitting -> Released`. Always produces exactly one
    /// `Outcome`, never zero and never more than one; the whole call is
    /// bounded by `task_timeout`, which supersedes the sum of the child
    /// timeouts.
    pub async fn process(&self, url: String, cancel: &mut broadcast::Receiver<()>) -> Outcome {
        match timeout(self.config.task_timeout, self.process_inner(&url, cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Error {
                url,
                code: prebid_monitor_core::ErrorCode::Timeout.as_token(),
                message: "task-level timeout exceeded".to_string(),
                stack: None,
            },
        }
    }

    async fn process_inner(&self, url: &str, cancel: &mut broadcast::Receiver<()>) -> Outcome {
        let mut machine = PageMachine::new(url.to_string());
        machine.advance_to(PageState::Acquiring);

        let permit = tokio::select! {
            biased;
            _ = cancel.recv() => {
                return machine.transition(PageEvent::Cancelled).expect("cancelled is terminal");
            }
            acquired = timeout(self.config.acquire_timeout, self.semaphore.clone().acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    _ => return machine.transition(PageEvent::AcquireTimeout).expect("acquire timeout is terminal"),
                }
            }
        };

        let slot_index = match self.claim_browser_slot().await {
            Ok(idx) => idx,
            Err(e) => {
                drop(permit);
                return Outcome::Error {
                    url: url.to_string(),
                    code: prebid_monitor_core::ErrorCode::BrowserPageError.as_token(),
                    message: e.to_string(),
                    stack: None,
                };
            }
        };

        machine.advance_to(PageState::Navigating);
        let nav_result = self.navigate(slot_index, url, cancel).await;

        let tab = match nav_result {
            Ok(tab) => tab,
            Err(event) => {
                self.release_slot(slot_index, false).await;
                drop(permit);
                return machine.transition(event).expect("navigation failure is terminal");
            }
        };

        let outcome = match machine.transition(PageEvent::NavigationOk) {
            Some(outcome) => outcome,
            None => {
                let probe_result = timeout(self.config.probe_timeout, self.probe.probe(&tab, url, self.config.probe_timeout)).await;
                match probe_result {
                    Ok(Ok(page_data)) => machine.transition(PageEvent::ProbeOk(page_data)),
                    Ok(Err(CrawlError::Timeout(_))) => machine.transition(PageEvent::ProbeTimeout),
                    Ok(Err(e)) => machine.transition(PageEvent::ProbeFailed(e.to_string())),
                    Err(_) => machine.transition(PageEvent::ProbeTimeout),
                }
            }
        };
        let outcome = outcome.expect("every terminal branch above produces an outcome");

        let page_close_ok = tab.close(false).is_ok();
        self.release_slot(slot_index, page_close_ok && !matches!(outcome, Outcome::Error { .. })).await;
        drop(permit);

        outcome
    }

    /// Pick an existing browser with spare page capacity, or launch a
    /// new one. Capped implicitly by the semaphore permit held by the
    /// caller, so at most `max_concurrency` pages are ever in flight.
    async fn claim_browser_slot(&self) -> Result<usize, CrawlError> {
        let mut browsers = self.browsers.lock().await;

        browsers.retain(|slot| !slot.should_retire(self.config.error_threshold));

        if let Some((idx, slot)) = browsers
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.page_count < self.config.max_pages_per_browser)
        {
            slot.page_count += 1;
            return Ok(idx);
        }

        let slot = BrowserSlot::launch(self.config.headless)?;
        browsers.push(slot);
        let idx = browsers.len() - 1;
        browsers[idx].page_count += 1;
        info!(browsers = browsers.len(), "launched new browser for rotation");
        Ok(idx)
    }

    async fn release_slot(&self, idx: usize, success: bool) {
        let mut browsers = self.browsers.lock().await;
        if let Some(slot) = browsers.get_mut(idx) {
            if success {
                slot.record_success();
            } else {
                slot.record_error();
            }
        }
    }

    async fn navigate(
        &self,
        slot_index: usize,
        url: &str,
        cancel: &mut broadcast::Receiver<()>,
    ) -> Result<Arc<headless_chrome::Tab>, PageEvent> {
        let tab = {
            let browsers = self.browsers.lock().await;
            let slot = browsers.get(slot_index).ok_or_else(|| {
                PageEvent::NavigationFailed("browser slot disappeared from rotation".to_string())
            })?;
            slot.browser
                .new_tab()
                .map_err(|e| PageEvent::NavigationFailed(e.to_string()))?
        };

        // Best-effort dialog auto-dismiss: override window.alert/confirm/
        // prompt before navigating away from the fresh tab's about:blank.
        // Dismissal failures are logged as warnings, never an Outcome.
        if let Err(e) = tab.evaluate(
            "window.alert = function(){}; window.confirm = function(){return true}; window.prompt = function(){return null};",
            false,
        ) {
            warn!(url, "failed to install dialog auto-dismiss override: {e}");
        }

        let navigate_url = url.to_string();
        tokio::select! {
            biased;
            _ = cancel.recv() => Err(PageEvent::Cancelled),
            result = timeout(self.config.navigation_timeout, self.navigate_blocking(tab.clone(), navigate_url)) => {
                match result {
                    Ok(Ok(())) => Ok(tab),
                    Ok(Err(raw)) => Err(PageEvent::NavigationFailed(raw)),
                    Err(_) => Err(PageEvent::NavigationTimeout),
                }
            }
        }
    }

    /// `headless_chrome`'s `Tab` API is synchronous (blocking CDP round
    /// trips), called directly from this `async fn` rather than through
    /// `spawn_blocking`.
    async fn navigate_blocking(&self, tab: Arc<headless_chrome::Tab>, url: String) -> Result<(), String> {
        tab.navigate_to(&url).map_err(|e| e.to_string())?;
        tab.wait_until_navigated().map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prebid_monitor_core::PageData;

    /// Always-empty page probe double for exercising the pool's lifecycle
    /// without a real Prebid-detection probe.
    struct NullProbe;

    #[async_trait]
    impl PageProbe for NullProbe {
        async fn probe(
            &self,
            _tab: &headless_chrome::Tab,
            url: &str,
            _timeout: Duration,
        ) -> Result<PageData, CrawlError> {
            Ok(PageData {
                url: url.to_string(),
                date: "2026-07-28".to_string(),
                libraries: Vec::new(),
                prebid_instances: Vec::new(),
            })
        }
    }

    #[test]
    fn pool_config_defaults_match_spec_bounds() {
        let config = PoolConfig::default();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.task_timeout, Duration::from_secs(120));
        assert_eq!(config.navigation_timeout, Duration::from_secs(60));
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancel_before_acquire_yields_cancelled_outcome() {
        let pool = WorkerPool::new(PoolConfig::default(), Arc::new(NullProbe));
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        let outcome = pool.process("https://example.com".to_string(), &mut rx).await;
        match outcome {
            Outcome::Error { code, .. } => assert_eq!(code, "CANCELLED"),
            other => panic!("expected cancelled error, got {other:?}"),
        }
    }
}

//! Explicit per-page lifecycle state machine, replacing callback-heavy
//! navigation/dialog handling with explicit events.
//! `PageMachine::transition` is the *only* site in the pool that turns a
//! low-level cause into an `Outcome` code — callers never construct an
//! `Outcome::Error` by hand outside of it.

use prebid_monitor_core::{ErrorCode, Outcome, PageData};

use crate::classify::{classify, NavigationCause};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Queued,
    Acquiring,
    Navigating,
    Probing,
    Emitting,
    Released,
}

/// Explicit events driving the state machine. Every way a page's
/// processing can end is represented here rather than as an ad-hoc
/// error string constructed at the call site.
pub enum PageEvent {
    AcquireTimeout,
    NavigationOk,
    NavigationTimeout,
    NavigationFailed(String),
    ProbeOk(PageData),
    ProbeTimeout,
    ProbeFailed(String),
    Cancelled,
}

pub struct PageMachine {
    pub state: PageState,
    pub url: String,
}

impl PageMachine {
    pub fn new(url: String) -> Self {
        Self {
            state: PageState::Queued,
            url,
        }
    }

    pub fn advance_to(&mut self, state: PageState) {
        self.state = state;
    }

    /// Drive one event through the machine. Returns `Some(Outcome)` when
    /// the event is terminal (success, no-data, or a classified error);
    /// returns `None` when the event only moves the state forward and
    /// processing continues (there is currently only one such case,
    /// `NavigationOk`, handled by the caller advancing state directly).
    pub fn transition(&mut self, event: PageEvent) -> Option<Outcome> {
        match event {
            PageEvent::AcquireTimeout => {
                self.state = PageState::Released;
                Some(Outcome::Error {
                    url: self.url.clone(),
                    code: ErrorCode::BrowserPageError.as_token(),
                    message: "timed out acquiring a browser page".to_string(),
                    stack: None,
                })
            }
            PageEvent::NavigationOk => {
                self.state = PageState::Probing;
                None
            }
            PageEvent::NavigationTimeout => {
                self.state = PageState::Released;
                Some(Outcome::Error {
                    url: self.url.clone(),
                    code: ErrorCode::Timeout.as_token(),
                    message: "navigation timed out".to_string(),
                    stack: None,
                })
            }
            PageEvent::NavigationFailed(raw) => {
                self.state = PageState::Released;
                let cause = crate::classify::classify_navigation_error(&raw);
                let (code, _) = classify(&cause);
                Some(Outcome::Error {
                    url: self.url.clone(),
                    code,
                    message: raw,
                    stack: None,
                })
            }
            PageEvent::ProbeOk(page_data) => {
                self.state = PageState::Emitting;
                Some(Outcome::Success { page_data })
            }
            PageEvent::ProbeTimeout => {
                self.state = PageState::Released;
                Some(Outcome::Error {
                    url: self.url.clone(),
                    code: ErrorCode::ProbeTimeout.as_token(),
                    message: "page probe timed out".to_string(),
                    stack: None,
                })
            }
            PageEvent::ProbeFailed(message) => {
                self.state = PageState::Released;
                // Missing probe data is `NoData`, not an error.
                if message.is_empty() {
                    Some(Outcome::NoData { url: self.url.clone() })
                } else {
                    Some(Outcome::Error {
                        url: self.url.clone(),
                        code: ErrorCode::ProbeEvalError.as_token(),
                        message,
                        stack: None,
                    })
                }
            }
            PageEvent::Cancelled => {
                self.state = PageState::Released;
                Some(Outcome::Error {
                    url: self.url.clone(),
                    code: ErrorCode::Cancelled.as_token(),
                    message: "run cancelled".to_string(),
                    stack: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_timeout_is_terminal_and_classified() {
        let mut m = PageMachine::new("https://a.example".to_string());
        let outcome = m.transition(PageEvent::AcquireTimeout).unwrap();
        assert_eq!(m.state, PageState::Released);
        match outcome {
            Outcome::Error { code, .. } => assert_eq!(code, "BROWSER_PAGE_ERROR"),
            _ => panic!("expected Error outcome"),
        }
    }

    #[test]
    fn navigation_ok_advances_without_emitting() {
        let mut m = PageMachine::new("https://a.example".to_string());
        assert!(m.transition(PageEvent::NavigationOk).is_none());
        assert_eq!(m.state, PageState::Probing);
    }

    #[test]
    fn dns_navigation_failure_classified_permanent() {
        let mut m = PageMachine::new("https://a.example".to_string());
        let outcome = m
            .transition(PageEvent::NavigationFailed("net::ERR_NAME_NOT_RESOLVED".to_string()))
            .unwrap();
        match outcome {
            Outcome::Error { code, .. } => assert_eq!(code, "DNS_UNRESOLVED"),
            _ => panic!("expected Error outcome"),
        }
    }

    #[test]
    fn empty_probe_failure_is_no_data_not_error() {
        let mut m = PageMachine::new("https://a.example".to_string());
        let outcome = m.transition(PageEvent::ProbeFailed(String::new())).unwrap();
        assert!(matches!(outcome, Outcome::NoData { .. }));
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut m = PageMachine::new("https://a.example".to_string());
        let outcome = m.transition(PageEvent::Cancelled).unwrap();
        match outcome {
            Outcome::Error { code, .. } => assert_eq!(code, "CANCELLED"),
            _ => panic!("expected Error outcome"),
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CrawlError;

/// Processing status of a single URL in the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStatus {
    Success,
    NoData,
    Error,
    /// Queued for another attempt; distinct from `Error` so a partially
    /// retried URL isn't mistaken for a final outcome mid-run.
    Retry,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Success => "success",
            UrlStatus::NoData => "no_data",
            UrlStatus::Error => "error",
            UrlStatus::Retry => "retry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(UrlStatus::Success),
            "no_data" => Some(UrlStatus::NoData),
            "error" => Some(UrlStatus::Error),
            "retry" => Some(UrlStatus::Retry),
            _ => None,
        }
    }
}

/// One row of the URL State Store.
///
/// Invariants: `has_prebid` only ever flips false -> true for a given url
/// (a later run that finds no Prebid instance must not erase an earlier
/// positive result); `retry_count` never exceeds the configured
/// `max_retries`, at which point the record's status is forced to `Error`
/// and it is excluded from further retry selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub status: UrlStatus,
    pub timestamp: DateTime<Utc>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub has_prebid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single named Prebid.js instance discovered on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrebidInstance {
    pub global_var_name: String,
    pub version: Option<String>,
    pub modules: Vec<String>,
}

/// Everything extracted from a successfully probed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageData {
    pub url: String,
    /// UTC calendar date the page was probed, `YYYY-MM-DD`.
    pub date: String,
    /// Ad-tech library tokens detected on the page, in detection order.
    pub libraries: Vec<String>,
    pub prebid_instances: Vec<PrebidInstance>,
}

/// Result of probing a single URL, carried from the Worker Pool back to
/// the Orchestrator for artifact writing and state-store update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Outcome {
    Success { page_data: PageData },
    NoData { url: String },
    Error {
        url: String,
        code: String,
        message: String,
        stack: Option<String>,
    },
}

impl Outcome {
    pub fn url(&self) -> &str {
        match self {
            Outcome::Success { page_data } => &page_data.url,
            Outcome::NoData { url } => url,
            Outcome::Error { url, .. } => url,
        }
    }

    pub fn status(&self) -> UrlStatus {
        match self {
            Outcome::Success { .. } => UrlStatus::Success,
            Outcome::NoData { .. } => UrlStatus::NoData,
            Outcome::Error { .. } => UrlStatus::Error,
        }
    }

    pub fn has_prebid(&self) -> bool {
        match self {
            Outcome::Success { page_data } => !page_data.prebid_instances.is_empty(),
            _ => false,
        }
    }
}

/// A 1-based, inclusive line range applied to a corpus exactly once, at
/// the URL Loader. `start` must be <= `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: usize,
    pub end: usize,
}

impl RangeSpec {
    pub fn new(start: usize, end: usize) -> Result<Self, CrawlError> {
        if start == 0 {
            return Err(CrawlError::RangeOutOfBounds { start, total: end });
        }
        if start > end {
            return Err(CrawlError::RangeOutOfBounds { start, total: end });
        }
        Ok(Self { start, end })
    }

    /// Clip this range to `total` available lines, returning the
    /// effective 0-based `[start, end)` slice bounds. A `total` of zero
    /// always yields an empty slice rather than `RangeOutOfBounds`: there is
    /// nothing for any `start` to be out of bounds against, and a caller
    /// requesting "the whole corpus" of a genuinely empty source must not
    /// be treated as a bounds error.
    pub fn clip(&self, total: usize) -> Result<(usize, usize), CrawlError> {
        if total == 0 {
            return Ok((0, 0));
        }
        if self.start > total {
            return Err(CrawlError::RangeOutOfBounds {
                start: self.start,
                total,
            });
        }
        let end = self.end.min(total);
        Ok((self.start - 1, end))
    }
}

/// An ordered list of URLs resolved from a source, with the range already
/// applied by the loader.
pub type Corpus = Vec<String>;

/// Cached body for one source key in the Content Cache.
#[derive(Debug, Clone)]
pub struct CachedContent {
    pub source_key: String,
    pub body_text: String,
    pub fetched_at: DateTime<Utc>,
    pub size_bytes: usize,
    pub hit_count: u64,
}

/// Implemented by whatever extracts ad-tech fingerprints from a live page.
/// The pool drives navigation and lifecycle; the probe only evaluates.
#[async_trait]
pub trait PageProbe: Send + Sync + 'static {
    async fn probe(
        &self,
        tab: &headless_chrome::Tab,
        url: &str,
        timeout: Duration,
    ) -> Result<PageData, CrawlError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_clip_within_bounds() {
        let r = RangeSpec::new(2, 5).unwrap();
        assert_eq!(r.clip(10).unwrap(), (1, 5));
    }

    #[test]
    fn range_clip_truncates_to_total() {
        let r = RangeSpec::new(2, 100).unwrap();
        assert_eq!(r.clip(10).unwrap(), (1, 10));
    }

    #[test]
    fn range_start_past_total_is_out_of_bounds() {
        let r = RangeSpec::new(20, 30).unwrap();
        assert!(r.clip(10).is_err());
    }

    #[test]
    fn zero_total_clips_to_empty_without_error() {
        let r = RangeSpec::new(1, usize::MAX).unwrap();
        assert_eq!(r.clip(0).unwrap(), (0, 0));
    }

    #[test]
    fn range_start_must_not_exceed_end() {
        assert!(RangeSpec::new(5, 2).is_err());
    }

    #[test]
    fn has_prebid_true_only_on_success_with_instances() {
        let success = Outcome::Success {
            page_data: PageData {
                url: "https://example.com".into(),
                date: "2026-07-28".into(),
                libraries: vec!["prebid".into()],
                prebid_instances: vec![PrebidInstance {
                    global_var_name: "pbjs".into(),
                    version: Some("8.0.0".into()),
                    modules: vec![],
                }],
            },
        };
        assert!(success.has_prebid());

        let no_data = Outcome::NoData {
            url: "https://example.com".into(),
        };
        assert!(!no_data.has_prebid());
    }
}

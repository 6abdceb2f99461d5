use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use prebid_monitor_core::{CachedContent, CrawlError};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::debug;

static DOMAIN_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9.-]+\.[a-z]{2,}(/.*)?$").unwrap()
});

/// Memoizes corpus fetches keyed by source URL so that a remote source
/// read with multiple ranges in the same run only ever hits the network
/// once. Per-key `Mutex` guards only the in-flight fetch itself
/// (stampede protection) — once a fetch lands, readers take the shared
/// `Arc<String>` lock-free.
pub struct ContentCache {
    entries: DashMap<String, Arc<Mutex<Slot>>>,
    client: reqwest::Client,
}

enum Slot {
    Empty,
    Ready(Arc<CachedContent>),
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
        }
    }

    /// Return the cached body for `source`, fetching it over HTTP(S) on
    /// first access. A failed fetch removes its placeholder so a later
    /// call retries cleanly rather than permanently poisoning the cache.
    pub async fn get_or_fetch(&self, source: &str) -> Result<Arc<CachedContent>, CrawlError> {
        let slot = self
            .entries
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::Empty)))
            .clone();

        let mut guard = slot.lock().await;
        if let Slot::Ready(content) = &*guard {
            debug!(source, "content cache hit");
            return Ok(content.clone());
        }

        match self.fetch(source).await {
            Ok(content) => {
                let content = Arc::new(content);
                *guard = Slot::Ready(content.clone());
                Ok(content)
            }
            Err(err) => {
                drop(guard);
                self.entries.remove(source);
                Err(err)
            }
        }
    }

    async fn fetch(&self, source: &str) -> Result<CachedContent, CrawlError> {
        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|e| CrawlError::SourceUnavailable(format!("{source}: {e}")))?;

        if !response.status().is_success() {
            return Err(CrawlError::SourceUnavailable(format!(
                "{source}: HTTP {}",
                response.status()
            )));
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| CrawlError::SourceUnreadable(format!("{source}: {e}")))?;

        if body_text.is_empty() {
            return Err(CrawlError::SourceUnavailable(format!(
                "{source}: empty body"
            )));
        }

        Ok(CachedContent {
            source_key: source.to_string(),
            size_bytes: body_text.len(),
            body_text,
            fetched_at: chrono::Utc::now(),
            hit_count: 0,
        })
    }
}

/// Split `body` into trimmed, non-empty lines (tolerant of LF and CRLF),
/// normalize each into a URL (dropping any that don't normalize), then
/// return the 1-based inclusive `[start, end]` slice of the *normalized*
/// sequence, clipped to its length. Out-of-range bounds yield an empty
/// sequence; this is pure and has no failure mode of its own — bounds
/// checking with an error for `start` past the end happens at the
/// loader, which knows the total normalized corpus length up front.
/// Normalization runs before slicing so that `range` addresses candidate
/// URLs, not raw source lines a malformed entry would otherwise shift.
pub fn extract_range(body: &str, start: usize, end: usize) -> Vec<String> {
    let normalized = normalize_lines(raw_lines(body));

    if start == 0 || start > normalized.len() || start > end {
        return Vec::new();
    }

    let end = end.min(normalized.len());
    normalized[start - 1..end].to_vec()
}

/// Split `body` into trimmed, non-empty lines, tolerant of LF and CRLF.
pub fn raw_lines(body: &str) -> Vec<String> {
    body.split('\n')
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/// Normalize a sequence of trimmed, non-empty candidate lines, dropping
/// whichever don't normalize to a URL.
pub fn normalize_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines.into_iter().filter_map(|l| normalize_url(l.as_ref())).collect()
}

/// Normalize one trimmed, non-empty line: drop lines with internal
/// whitespace, promote bare domains to `https://`, drop non-http(s)
/// schemes.
pub fn normalize_url(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.split_whitespace().count() > 1 {
        return None;
    }

    if let Ok(url) = url::Url::parse(line) {
        return match url.scheme() {
            "http" | "https" => Some(url.to_string()),
            _ => None,
        };
    }

    if DOMAIN_LIKE.is_match(line) {
        return Some(format!("https://{line}"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lf_and_crlf_uniformly() {
        let body = "a.com\r\nb.com\nc.com\r\n";
        assert_eq!(
            extract_range(body, 1, 3),
            vec!["https://a.com/", "https://b.com/", "https://c.com/"]
        );
    }

    #[test]
    fn drops_empty_lines_without_shifting_indices_incorrectly() {
        let body = "a.com\n\nb.com\n\n\nc.com";
        assert_eq!(
            extract_range(body, 1, 3),
            vec!["https://a.com/", "https://b.com/", "https://c.com/"]
        );
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let body = "  a.com  \n b.com\n";
        assert_eq!(extract_range(body, 1, 2), vec!["https://a.com/", "https://b.com/"]);
    }

    #[test]
    fn bounds_are_clipped_not_errored() {
        let body = "a.com\nb.com\nc.com";
        assert_eq!(extract_range(body, 2, 100), vec!["https://b.com/", "https://c.com/"]);
        assert_eq!(extract_range(body, 10, 20), Vec::<String>::new());
    }

    #[test]
    fn empty_range_is_legal() {
        let body = "a.com\nb.com";
        assert_eq!(extract_range(body, 5, 3), Vec::<String>::new());
    }

    #[test]
    fn normalizes_before_slicing_so_invalid_lines_dont_consume_an_index() {
        // A malformed middle line must be dropped before ranges are applied,
        // not after — otherwise range=1-2 would address it instead of c.com.
        let body = "a.com\nftp://bad\nc.com";
        assert_eq!(extract_range(body, 1, 2), vec!["https://a.com/", "https://c.com/"]);
    }
}

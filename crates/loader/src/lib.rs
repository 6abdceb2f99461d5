use once_cell::sync::Lazy;
use prebid_monitor_cache::{normalize_lines, raw_lines, ContentCache};
use prebid_monitor_core::{Corpus, CrawlError, RangeSpec};
use regex::Regex;
use tracing::warn;

pub use prebid_monitor_cache::normalize_url;

/// Exactly one of these selects where the corpus comes from. This is the
/// sole range-application site in the pipeline — nothing downstream may
/// narrow the corpus by index again.
pub enum Source {
    FilePath(String),
    RemoteTextUrl(String),
    CodeHostBlobUrl(String),
}

static URL_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)url").unwrap());

/// `(host, raw_host)` pairs for the code-host blob-URL transform. The
/// literal `raw.<host>` rule from the external interface contract holds
/// for github.com but not every host shaped like it, so known hosts are
/// special-cased and anything else falls back to the literal rule.
const RAW_HOSTS: &[(&str, &str)] = &[
    ("github.com", "raw.githubusercontent.com"),
    ("gitlab.com", "gitlab.com"), // gitlab serves raw content at /-/raw/<ref>/<path>, handled separately below
];

pub struct UrlLoader {
    cache: ContentCache,
}

impl Default for UrlLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlLoader {
    pub fn new() -> Self {
        Self {
            cache: ContentCache::new(),
        }
    }

    /// Resolve `source` into a Corpus, applying `range` exactly once.
    ///
    /// Normalization runs before the range is applied: split, trim, drop
    /// empty lines, normalize (dropping whatever doesn't become a URL),
    /// and only then slice `[range.start, range.end]` out of what's left,
    /// so `range` addresses candidate URLs, not raw source lines a
    /// malformed entry would otherwise shift.
    pub async fn load(&self, source: &Source, range: RangeSpec) -> Result<Corpus, CrawlError> {
        let (body, is_csv) = self.read_source(source).await?;

        let candidates = if is_csv { extract_csv_urls(&body) } else { raw_lines(&body) };
        let normalized = normalize_lines(candidates.iter());

        if normalized.is_empty() && !candidates.is_empty() {
            warn!(source = source_key(source), "no valid URLs after normalization");
        }

        let (start, end) = range.clip(normalized.len())?;
        Ok(normalized[start..end].to_vec())
    }

    async fn read_source(&self, source: &Source) -> Result<(String, bool), CrawlError> {
        match source {
            Source::FilePath(path) => {
                let body = tokio::fs::read(path)
                    .await
                    .map_err(|e| CrawlError::SourceUnavailable(format!("{path}: {e}")))?;
                let text = String::from_utf8(body)
                    .map_err(|_| CrawlError::SourceUnreadable(format!("{path}: not UTF-8")))?;
                let is_csv = path.to_lowercase().ends_with(".csv") || looks_like_csv(&text);
                Ok((text, is_csv))
            }
            Source::RemoteTextUrl(url) => {
                let content = self.cache.get_or_fetch(url).await?;
                let is_csv = url.to_lowercase().ends_with(".csv") || looks_like_csv(&content.body_text);
                Ok((content.body_text.clone(), is_csv))
            }
            Source::CodeHostBlobUrl(url) => {
                let raw = to_raw_url(url);
                let content = self.cache.get_or_fetch(&raw).await?;
                let is_csv = url.to_lowercase().ends_with(".csv") || looks_like_csv(&content.body_text);
                Ok((content.body_text.clone(), is_csv))
            }
        }
    }
}

fn source_key(source: &Source) -> &str {
    match source {
        Source::FilePath(s) | Source::RemoteTextUrl(s) | Source::CodeHostBlobUrl(s) => s,
    }
}

fn looks_like_csv(body: &str) -> bool {
    body.lines().next().map(|h| h.contains(',')).unwrap_or(false)
}

/// Pick the URL column (first header matching `/url/i`, else column 0)
/// and ignore the rest.
fn extract_csv_urls(body: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_bytes());

    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(_) => return Vec::new(),
    };

    let col = headers
        .iter()
        .position(|h| URL_HEADER.is_match(h))
        .unwrap_or(0);

    let mut out = Vec::new();
    for record in reader.records().flatten() {
        if let Some(field) = record.get(col) {
            let trimmed = field.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }
    out
}

fn to_raw_url(blob_url: &str) -> String {
    for (host, raw_host) in RAW_HOSTS {
        let prefix = format!("https://{host}/");
        if let Some(rest) = blob_url.strip_prefix(&prefix) {
            if let Some(blob_pos) = rest.find("/blob/") {
                let (owner_repo, after) = rest.split_at(blob_pos);
                let after = &after["/blob/".len()..];
                if *host == "github.com" {
                    return format!("https://{raw_host}/{owner_repo}/{after}");
                }
                return format!("https://{host}/{owner_repo}/-/raw/{after}");
            }
        }
    }

    // unknown host: fall back to `raw.<host>` with the `/blob/` segment removed
    if let Some(rest) = blob_url.strip_prefix("https://") {
        if let Some(host_end) = rest.find('/') {
            let (host, path) = rest.split_at(host_end);
            if let Some(blob_pos) = path.find("/blob/") {
                let (owner_repo, after) = path.split_at(blob_pos);
                let after = &after["/blob/".len()..];
                return format!("https://raw.{host}{owner_repo}/{after}");
            }
        }
    }

    blob_url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_domain() {
        assert_eq!(normalize_url("example.com"), Some("https://example.com/".to_string()));
    }

    #[test]
    fn keeps_existing_https() {
        assert_eq!(
            normalize_url("https://example.com/page"),
            Some("https://example.com/page".to_string())
        );
    }

    #[test]
    fn drops_non_http_scheme() {
        assert_eq!(normalize_url("ftp://example.com"), None);
    }

    #[test]
    fn drops_lines_with_internal_whitespace() {
        assert_eq!(normalize_url("example.com extra"), None);
    }

    #[test]
    fn github_blob_url_maps_to_raw_githubusercontent() {
        let raw = to_raw_url("https://github.com/acme/repo/blob/main/urls.txt");
        assert_eq!(raw, "https://raw.githubusercontent.com/acme/repo/main/urls.txt");
    }

    #[test]
    fn unknown_host_falls_back_to_literal_rule() {
        let raw = to_raw_url("https://example-host.com/acme/repo/blob/main/urls.txt");
        assert_eq!(raw, "https://raw.example-host.com/acme/repo/main/urls.txt");
    }

    #[test]
    fn csv_picks_url_column_by_header() {
        let body = "name,url\nAlice,https://a.example\nBob,https://b.example\n";
        assert_eq!(
            extract_csv_urls(body),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn csv_falls_back_to_first_column_without_url_header() {
        let body = "site,owner\nhttps://a.example,Alice\n";
        assert_eq!(extract_csv_urls(body), vec!["https://a.example"]);
    }

    #[tokio::test]
    async fn range_addresses_normalized_candidates_not_raw_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        tokio::fs::write(&path, "a.com\nftp://bad\nc.com\n").await.unwrap();

        let loader = UrlLoader::new();
        let source = Source::FilePath(path.to_string_lossy().to_string());
        let range = RangeSpec::new(1, 2).unwrap();

        let corpus = loader.load(&source, range).await.unwrap();
        assert_eq!(corpus, vec!["https://a.com/".to_string(), "https://c.com/".to_string()]);
    }
}

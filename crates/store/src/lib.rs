use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use prebid_monitor_core::{ErrorCode, Outcome, PageData, RangeSpec, Transience, UrlStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Persistent URL -> UrlRecord mapping with transactional batch updates.
/// Backed by SQLite in WAL mode: a single embedded file, single writer,
/// no external server, the same query-building style (`sqlx::query`/
/// `query_as`, bind parameters, embedded `include_str!` migrations) the
/// teacher uses against Postgres, retargeted at the single-writer
/// `sqlite` feature.
#[derive(Clone)]
pub struct UrlStateStore {
    pool: SqlitePool,
    max_retries: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeAnalysis {
    pub total: usize,
    pub processed: usize,
    pub unprocessed: usize,
    pub pct: f64,
    pub next_unprocessed_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeSuggestion {
    pub start: usize,
    pub end: usize,
    pub est_unprocessed: usize,
    pub efficiency_pct: f64,
}

impl UrlStateStore {
    pub async fn new(database_path: &str, max_retries: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("opening url state store")?;

        info!(database_path, "connected to url state store");
        Ok(Self { pool, max_retries })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("url state store migrations complete");
        Ok(())
    }

    /// True iff a record exists with status in {success, no_data}. Per
    /// the spec's documented decision, `retry` is treated as *not
    /// processed* so it is re-dispatched without an explicit retry pass.
    pub async fn is_processed(&self, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT status FROM processed_urls WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => {
                let status: String = row.get("status");
                matches!(status.as_str(), "success" | "no_data")
            }
            None => false,
        })
    }

    /// Preserve input order; exclude URLs already processed. Uses one
    /// transaction so the scan sees a consistent snapshot even while a
    /// concurrent batch update commits.
    pub async fn filter_unprocessed(&self, urls: &[String]) -> Result<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let placeholders = urls.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT url FROM processed_urls WHERE status IN ('success','no_data') AND url IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for url in urls {
            query = query.bind(url);
        }
        let rows = query.fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let processed: std::collections::HashSet<String> =
            rows.into_iter().map(|r| r.get::<String, _>("url")).collect();

        Ok(urls
            .iter()
            .filter(|u| !processed.contains(*u))
            .cloned()
            .collect())
    }

    /// Apply a full batch of outcomes atomically. All-or-nothing: if any
    /// write fails the transaction rolls back and none of the batch's
    /// records change.
    pub async fn update_from_outcomes(&self, outcomes: &[Outcome]) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for outcome in outcomes {
            let url = outcome.url();
            let existing = sqlx::query("SELECT retry_count, has_prebid FROM processed_urls WHERE url = ?")
                .bind(url)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| {
                    let retry_count: i64 = row.get("retry_count");
                    let has_prebid: i64 = row.get("has_prebid");
                    (retry_count as u32, has_prebid != 0)
                });

            let update = apply_outcome(existing, outcome, self.max_retries);
            let now = Utc::now().to_rfc3339();

            sqlx::query(
                "INSERT INTO processed_urls (url, status, timestamp, error_code, retry_count, has_prebid, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(url) DO UPDATE SET
                    status = excluded.status,
                    timestamp = excluded.timestamp,
                    error_code = excluded.error_code,
                    retry_count = excluded.retry_count,
                    has_prebid = excluded.has_prebid,
                    updated_at = excluded.updated_at",
            )
            .bind(url)
            .bind(update.status.as_str())
            .bind(&now)
            .bind(&update.error_code)
            .bind(update.retry_count as i64)
            .bind(update.has_prebid as i64)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM processed_urls GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    pub async fn total(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM processed_urls")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn analyze_range(&self, corpus: &[String], range: RangeSpec) -> Result<RangeAnalysis> {
        let (start, end) = range
            .clip(corpus.len())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let slice = &corpus[start..end];

        let unprocessed = self.filter_unprocessed(slice).await?;
        let unprocessed_set: std::collections::HashSet<&String> = unprocessed.iter().collect();

        let total = slice.len();
        let processed = total - unprocessed.len();
        let pct = if total == 0 {
            0.0
        } else {
            (processed as f64 / total as f64) * 100.0
        };
        let next_unprocessed_index = slice
            .iter()
            .position(|u| unprocessed_set.contains(u));

        Ok(RangeAnalysis {
            total,
            processed,
            unprocessed: unprocessed.len(),
            pct,
            next_unprocessed_index,
        })
    }

    /// Sample-based scan over non-overlapping `batch_size` windows,
    /// returning the top `k` windows with estimated unprocessed
    /// efficiency above 20%.
    pub async fn suggest_ranges(
        &self,
        corpus: &[String],
        batch_size: usize,
        k: usize,
    ) -> Result<Vec<RangeSuggestion>> {
        if batch_size == 0 || corpus.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut window_start = 0;
        while window_start < corpus.len() {
            let window_end = (window_start + batch_size).min(corpus.len());
            let window = &corpus[window_start..window_end];
            let window_len = window.len();

            let sample_size = (window_len as f64 * 0.01).ceil() as usize;
            let sample_size = sample_size.max(window_len.min(1000)).max(1).min(window_len);

            let stride = (window_len / sample_size).max(1);
            let sample: Vec<String> = window.iter().step_by(stride).take(sample_size).cloned().collect();

            let unprocessed_sample = self.filter_unprocessed(&sample).await?;
            let fraction = unprocessed_sample.len() as f64 / sample.len() as f64;
            let efficiency_pct = fraction * 100.0;

            if efficiency_pct > 20.0 {
                candidates.push(RangeSuggestion {
                    start: window_start + 1,
                    end: window_end,
                    est_unprocessed: (fraction * window_len as f64).round() as usize,
                    efficiency_pct,
                });
            }

            window_start = window_end;
        }

        candidates.sort_by(|a, b| {
            b.efficiency_pct
                .partial_cmp(&a.efficiency_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.start.cmp(&b.start))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    /// One-time bootstrap: scan `<store_root>/*/*.json` day artifacts and
    /// mark each URL found as `success`. A single file that fails to
    /// parse is logged and skipped, not fatal.
    pub async fn import_existing(&self, store_root: &Path) -> Result<u64> {
        let mut imported = 0u64;
        let mut month_dirs = match tokio::fs::read_dir(store_root).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, root = %store_root.display(), "store root unreadable, skipping import");
                return Ok(0);
            }
        };

        let mut files = Vec::new();
        while let Some(month_entry) = month_dirs.next_entry().await? {
            if !month_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut day_files = tokio::fs::read_dir(month_entry.path()).await?;
            while let Some(day_entry) = day_files.next_entry().await? {
                if day_entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(day_entry.path());
                }
            }
        }

        for path in files {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, file = %path.display(), "skipping unreadable artifact file");
                    continue;
                }
            };
            let pages: Vec<PageData> = match serde_json::from_str(&raw) {
                Ok(pages) => pages,
                Err(e) => {
                    warn!(error = %e, file = %path.display(), "skipping malformed artifact file");
                    continue;
                }
            };

            let outcomes: Vec<Outcome> = pages
                .into_iter()
                .map(|page_data| Outcome::Success { page_data })
                .collect();
            self.update_from_outcomes(&outcomes).await?;
            imported += outcomes.len() as u64;
        }

        Ok(imported)
    }

    pub async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM processed_urls").execute(&self.pool).await?;
        Ok(())
    }

    /// URLs currently sitting in `retry` status, ordered by least-recently
    /// updated first. Distinct from the normal `skip_processed` path: this
    /// is the explicit retry pass (spec.md §8 scenario 4) that targets
    /// exactly the URLs a prior run marked for another attempt, rather than
    /// re-running `filter_unprocessed` over a whole corpus.
    pub async fn get_urls_for_retry(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT url FROM processed_urls WHERE status = 'retry' ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("url")).collect())
    }

    /// Fraction of recorded attempts against `host` that ended in
    /// `error`, used by the Pre-flight Filter's prior-health prediction
    /// instead of a separate model. Returns `0.0` when the host has no
    /// history yet.
    pub async fn host_failure_rate(&self, host: &str) -> Result<f64> {
        let https_pattern = format!("https://{host}/%");
        let https_exact = format!("https://{host}");
        let http_pattern = format!("http://{host}/%");
        let http_exact = format!("http://{host}");

        let row = sqlx::query(
            "SELECT
                COUNT(*) as total,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) as errors
             FROM processed_urls
             WHERE url LIKE ? OR url = ? OR url LIKE ? OR url = ?",
        )
        .bind(&https_pattern)
        .bind(&https_exact)
        .bind(&http_pattern)
        .bind(&http_exact)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        if total == 0 {
            return Ok(0.0);
        }
        let errors: i64 = row.get::<Option<i64>, _>("errors").unwrap_or(0);
        Ok(errors as f64 / total as f64)
    }
}

struct OutcomeUpdate {
    status: UrlStatus,
    error_code: Option<String>,
    retry_count: u32,
    has_prebid: bool,
}

/// Pure decision function for one outcome against its existing record
/// (or `None` on first observation). Kept free of the pool so the
/// status-mapping rules are unit-testable without a database.
fn apply_outcome(
    existing: Option<(u32, bool)>,
    outcome: &Outcome,
    max_retries: u32,
) -> OutcomeUpdate {
    let (prev_retry_count, prev_has_prebid) = existing.unwrap_or((0, false));

    match outcome {
        Outcome::Success { .. } => OutcomeUpdate {
            status: UrlStatus::Success,
            error_code: None,
            retry_count: prev_retry_count,
            has_prebid: prev_has_prebid || outcome.has_prebid(),
        },
        Outcome::NoData { .. } => OutcomeUpdate {
            status: UrlStatus::NoData,
            error_code: None,
            retry_count: prev_retry_count,
            has_prebid: prev_has_prebid,
        },
        Outcome::Error { code, .. } => {
            let transience = ErrorCode::from_token(code).transience();
            if transience == Transience::Permanent {
                OutcomeUpdate {
                    status: UrlStatus::Error,
                    error_code: Some(code.clone()),
                    retry_count: prev_retry_count,
                    has_prebid: prev_has_prebid,
                }
            } else if prev_retry_count < max_retries {
                OutcomeUpdate {
                    status: UrlStatus::Retry,
                    error_code: Some(code.clone()),
                    retry_count: prev_retry_count + 1,
                    has_prebid: prev_has_prebid,
                }
            } else {
                OutcomeUpdate {
                    status: UrlStatus::Error,
                    error_code: Some(code.clone()),
                    retry_count: prev_retry_count,
                    has_prebid: prev_has_prebid,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prebid_monitor_core::PrebidInstance;

    fn success_outcome(url: &str, has_prebid: bool) -> Outcome {
        Outcome::Success {
            page_data: PageData {
                url: url.to_string(),
                date: "2026-07-28".to_string(),
                libraries: vec![],
                prebid_instances: if has_prebid {
                    vec![PrebidInstance {
                        global_var_name: "pbjs".into(),
                        version: None,
                        modules: vec![],
                    }]
                } else {
                    vec![]
                },
            },
        }
    }

    #[test]
    fn has_prebid_is_monotonic() {
        let update = apply_outcome(Some((0, true)), &success_outcome("https://a.example", false), 3);
        assert!(update.has_prebid);
    }

    #[test]
    fn permanent_error_does_not_increment_retry_count() {
        let outcome = Outcome::Error {
            url: "https://a.example".into(),
            code: "DNS_UNRESOLVED".into(),
            message: "no such host".into(),
            stack: None,
        };
        let update = apply_outcome(Some((0, false)), &outcome, 3);
        assert_eq!(update.status, UrlStatus::Error);
        assert_eq!(update.retry_count, 0);
    }

    #[test]
    fn transient_error_increments_retry_until_bound() {
        let outcome = Outcome::Error {
            url: "https://a.example".into(),
            code: "TIMEOUT".into(),
            message: "timed out".into(),
            stack: None,
        };
        let update = apply_outcome(Some((1, false)), &outcome, 3);
        assert_eq!(update.status, UrlStatus::Retry);
        assert_eq!(update.retry_count, 2);

        let exhausted = apply_outcome(Some((3, false)), &outcome, 3);
        assert_eq!(exhausted.status, UrlStatus::Error);
        assert_eq!(exhausted.retry_count, 3);
    }

    #[test]
    fn no_data_never_sets_has_prebid() {
        let outcome = Outcome::NoData {
            url: "https://a.example".into(),
        };
        let update = apply_outcome(Some((0, true)), &outcome, 3);
        assert!(update.has_prebid);
        let update = apply_outcome(Some((0, false)), &outcome, 3);
        assert!(!update.has_prebid);
    }
}

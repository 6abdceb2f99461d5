//! Orchestrator: composes the pipeline end-to-end and maintains run-level
//! state. This module is the top-level state machine; everything else
//! (Loader, Cache, State Store, Pre-flight, Worker Pool, Artifact Writer)
//! is a component it drives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use prebid_monitor_core::{ErrorCode, Outcome, RangeSpec};
use prebid_monitor_loader::{Source, UrlLoader};
use prebid_monitor_pool::WorkerPool;
use prebid_monitor_preflight::PreflightFilter;
use prebid_monitor_store::{RangeSuggestion, UrlStateStore};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::artifacts::{errors_by_code, ArtifactWriter};

pub struct RunOptions {
    pub source: Source,
    pub range: Option<RangeSpec>,
    pub skip_processed: bool,
    pub reset_tracking: bool,
    pub prefilter_processed: bool,
    pub force_reprocess: bool,
    pub chunk_size: usize,
    /// Only meaningful for `Source::FilePath`: rewrite the input file to
    /// contain only URLs that were not successfully processed this run.
    pub rewrite_input: bool,
    /// Skip corpus loading and dispatch exactly the store's `retry`-status
    /// URLs (spec.md §8 scenario 4's explicit retry pass).
    pub retry_pending: bool,
}

/// End-of-run structured summary.
#[derive(Debug, Default, serde::Serialize)]
pub struct ScanSummary {
    pub total_in_scope: usize,
    pub processed: usize,
    pub skipped_already: usize,
    pub successes: u64,
    pub no_data: u64,
    pub errors_by_code: HashMap<String, u64>,
    pub db_totals: HashMap<String, i64>,
    pub suggested_ranges: Vec<RangeSuggestion>,
}

impl ScanSummary {
    /// Log via `tracing` with structured fields AND print a one-line JSON
    /// blob to stdout, so both log aggregation and scripted/CI consumption
    /// work off the same run.
    pub fn emit(&self) {
        info!(
            total_in_scope = self.total_in_scope,
            processed = self.processed,
            skipped_already = self.skipped_already,
            successes = self.successes,
            no_data = self.no_data,
            errors = ?self.errors_by_code,
            "scan summary"
        );
        if let Ok(json) = serde_json::to_string(self) {
            println!("{json}");
        }
    }
}

pub struct Orchestrator {
    loader: UrlLoader,
    store: Arc<UrlStateStore>,
    pool: Arc<WorkerPool>,
    preflight: Option<PreflightFilter>,
    artifacts: Arc<ArtifactWriter>,
}

impl Orchestrator {
    pub fn new(
        loader: UrlLoader,
        store: Arc<UrlStateStore>,
        pool: Arc<WorkerPool>,
        preflight: Option<PreflightFilter>,
        artifacts: Arc<ArtifactWriter>,
    ) -> Self {
        Self {
            loader,
            store,
            pool,
            preflight,
            artifacts,
        }
    }

    /// Run one full scan: reset/bootstrap, range-limited load, dedup
    /// filter, optional pre-flight, chunked dispatch, and summary. The
    /// caller has already opened the store and run migrations.
    pub async fn run(
        &self,
        options: RunOptions,
        cancel_tx: &broadcast::Sender<()>,
    ) -> Result<ScanSummary> {
        if options.reset_tracking {
            self.store.reset().await?;
            info!("url state store reset");
        }

        if options.skip_processed && self.store.total().await? == 0 {
            if let Ok(store_root) = std::env::var("PREBID_MONITOR_IMPORT_ROOT") {
                let imported = self.store.import_existing(&PathBuf::from(store_root)).await?;
                info!(imported, "bootstrapped url state store from existing artifacts");
            }
        }

        if options.retry_pending {
            return self.run_retry_pass(&options, cancel_tx).await;
        }

        // The loader is the sole range-application site. A range that
        // starts past the corpus total is treated as an empty-scope early
        // exit here, not a fatal error: `RangeSpec::clip`'s own contract
        // still rejects it as `RangeOutOfBounds`, but this layer owns the
        // user-visible "no URLs to process" outcome and its 0 exit code.
        let range = options.range.unwrap_or(RangeSpec { start: 1, end: usize::MAX });
        let corpus = match self.loader.load(&options.source, range).await {
            Ok(corpus) => corpus,
            Err(prebid_monitor_core::CrawlError::RangeOutOfBounds { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if options.prefilter_processed {
            // `analyze_range`/`suggest_ranges` are dry-run tools that scan
            // candidate windows across the *whole* corpus, independent of
            // whatever range the caller asked to analyze — so they need the
            // unsliced corpus, fetched through the same cache (a second
            // `load` against the same source is a cache hit, not a second
            // network round trip).
            let full_range = RangeSpec { start: 1, end: usize::MAX };
            let full_corpus = match self.loader.load(&options.source, full_range).await {
                Ok(corpus) => corpus,
                Err(prebid_monitor_core::CrawlError::RangeOutOfBounds { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            return self.prefilter_summary(&full_corpus, range).await;
        }

        if corpus.is_empty() {
            info!("loader returned an empty corpus, early exit");
            return Ok(ScanSummary {
                total_in_scope: 0,
                db_totals: self.store.stats().await?,
                ..Default::default()
            });
        }

        // Dedup filter.
        let total_in_scope = corpus.len();
        let to_process = if options.skip_processed && !options.force_reprocess {
            self.store.filter_unprocessed(&corpus).await?
        } else {
            corpus.clone()
        };
        let skipped_already = total_in_scope - to_process.len();

        if to_process.is_empty() {
            info!(total_in_scope, "everything in range already processed, early exit");
            return Ok(ScanSummary {
                total_in_scope,
                skipped_already,
                db_totals: self.store.stats().await?,
                ..Default::default()
            });
        }

        // Optional pre-flight, reclassifying failures as Error outcomes
        // immediately so they update the store.
        let (processable, preflight_outcomes) = self.run_preflight(&to_process).await?;
        if !preflight_outcomes.is_empty() {
            self.artifacts.record_batch(&preflight_outcomes).await?;
            self.store.update_from_outcomes(&preflight_outcomes).await?;
        }

        // Dispatch in chunks, fan-in each chunk before moving on.
        let mut all_outcomes = preflight_outcomes;
        for chunk in processable.chunks(options.chunk_size.max(1)) {
            let outcomes = self.dispatch_chunk(chunk, cancel_tx).await;

            // Artifact write precedes state update: a crash in between
            // leaves the store unaware of a success, so a restart
            // conservatively re-attempts rather than silently skipping it.
            self.artifacts.record_batch(&outcomes).await?;
            self.store.update_from_outcomes(&outcomes).await?;

            all_outcomes.extend(outcomes);
        }

        if options.rewrite_input {
            if let Source::FilePath(path) = &options.source {
                self.rewrite_input_file(path, &all_outcomes).await?;
            }
        }

        let successes = all_outcomes.iter().filter(|o| matches!(o, Outcome::Success { .. })).count() as u64;
        let no_data = all_outcomes.iter().filter(|o| matches!(o, Outcome::NoData { .. })).count() as u64;
        let errors = errors_by_code(&all_outcomes);

        // Suggestions scan the whole corpus for where to point the next
        // run, not just the range just processed; a repeat `load` against
        // the same source is a cache hit.
        let full_range = RangeSpec { start: 1, end: usize::MAX };
        let suggestion_corpus = match self.loader.load(&options.source, full_range).await {
            Ok(corpus) => corpus,
            Err(_) => corpus.clone(),
        };
        let suggested_ranges = self
            .store
            .suggest_ranges(&suggestion_corpus, options.chunk_size.max(1), 3)
            .await?;

        let summary = ScanSummary {
            total_in_scope,
            processed: all_outcomes.len(),
            skipped_already,
            successes,
            no_data,
            errors_by_code: errors,
            db_totals: self.store.stats().await?,
            suggested_ranges,
        };
        Ok(summary)
    }

    /// Explicit retry pass: dispatch exactly the store's `retry`-status
    /// URLs through the pool, bypassing corpus loading and the range/dedup
    /// steps entirely (spec.md §8 scenario 4).
    async fn run_retry_pass(&self, options: &RunOptions, cancel_tx: &broadcast::Sender<()>) -> Result<ScanSummary> {
        let pending = self.store.get_urls_for_retry(options.chunk_size.max(1) as i64 * 10).await?;
        let total_in_scope = pending.len();
        if pending.is_empty() {
            info!("no urls pending retry, early exit");
            return Ok(ScanSummary {
                db_totals: self.store.stats().await?,
                ..Default::default()
            });
        }

        let mut all_outcomes = Vec::with_capacity(pending.len());
        for chunk in pending.chunks(options.chunk_size.max(1)) {
            let outcomes = self.dispatch_chunk(chunk, cancel_tx).await;
            self.artifacts.record_batch(&outcomes).await?;
            self.store.update_from_outcomes(&outcomes).await?;
            all_outcomes.extend(outcomes);
        }

        let successes = all_outcomes.iter().filter(|o| matches!(o, Outcome::Success { .. })).count() as u64;
        let no_data = all_outcomes.iter().filter(|o| matches!(o, Outcome::NoData { .. })).count() as u64;
        Ok(ScanSummary {
            total_in_scope,
            processed: all_outcomes.len(),
            successes,
            no_data,
            errors_by_code: errors_by_code(&all_outcomes),
            db_totals: self.store.stats().await?,
            ..Default::default()
        })
    }

    async fn prefilter_summary(&self, corpus: &[String], range: RangeSpec) -> Result<ScanSummary> {
        let analysis = self.store.analyze_range(corpus, range).await?;
        let suggested_ranges = self.store.suggest_ranges(corpus, 100, 3).await?;
        info!(
            total = analysis.total,
            processed = analysis.processed,
            unprocessed = analysis.unprocessed,
            pct = analysis.pct,
            "prefilter range analysis"
        );
        Ok(ScanSummary {
            total_in_scope: analysis.total,
            processed: analysis.processed,
            skipped_already: analysis.processed,
            db_totals: self.store.stats().await?,
            suggested_ranges,
            ..Default::default()
        })
    }

    /// Partition URLs into `(processable, preflight_error_outcomes)`. Each
    /// pre-flight failure is recorded as an `Error` outcome with a
    /// permanent code immediately, so it never reaches the pool and does
    /// not consume a retry attempt beyond this observation.
    async fn run_preflight(&self, urls: &[String]) -> Result<(Vec<String>, Vec<Outcome>)> {
        let Some(preflight) = &self.preflight else {
            return Ok((urls.to_vec(), Vec::new()));
        };

        let mut processable = Vec::with_capacity(urls.len());
        let mut outcomes = Vec::new();

        for url in urls {
            let host = url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_string()));
            let prior_failure_rate = match &host {
                Some(h) => self.store.host_failure_rate(h).await.unwrap_or(0.0),
                None => 0.0,
            };

            match preflight.check(url, prior_failure_rate).await {
                Ok(result) => {
                    if let Some(reason) = result.skip_reason {
                        outcomes.push(Outcome::Error {
                            url: url.clone(),
                            code: reason,
                            message: "pre-flight check failed".to_string(),
                            stack: None,
                        });
                        continue;
                    }
                    for warning in &result.warnings {
                        warn!(url, warning, "pre-flight warning");
                    }
                    processable.push(url.clone());
                }
                Err(e) => {
                    outcomes.push(Outcome::Error {
                        url: url.clone(),
                        code: ErrorCode::ProcessingError.as_token(),
                        message: e.to_string(),
                        stack: None,
                    });
                }
            }
        }

        Ok((processable, outcomes))
    }

    async fn dispatch_chunk(&self, chunk: &[String], cancel_tx: &broadcast::Sender<()>) -> Vec<Outcome> {
        let mut handles = Vec::with_capacity(chunk.len());
        for url in chunk {
            let pool = Arc::clone(&self.pool);
            let url = url.clone();
            let mut cancel_rx = cancel_tx.subscribe();
            let task_url = url.clone();
            handles.push((task_url, tokio::spawn(async move { pool.process(url, &mut cancel_rx).await })));
        }

        // Every dispatched URL must yield exactly one Outcome (§8): a
        // panicked task still needs a record, or dedup would re-dispatch it
        // forever without the store ever seeing why.
        let mut outcomes = Vec::with_capacity(handles.len());
        for (url, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, url, "worker task panicked, recording as processing error");
                    outcomes.push(Outcome::Error {
                        url,
                        code: ErrorCode::ProcessingError.as_token(),
                        message: format!("worker task panicked: {e}"),
                        stack: None,
                    });
                }
            }
        }
        outcomes
    }

    /// Rewrite the input text file to contain only URLs not successfully
    /// processed this run, plus lines that were outside the current scope
    /// untouched. Skipped for non-text sources by the caller.
    async fn rewrite_input_file(&self, path: &str, outcomes: &[Outcome]) -> Result<()> {
        let succeeded: std::collections::HashSet<&str> = outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Success { .. }))
            .map(|o| o.url())
            .collect();

        let original = tokio::fs::read_to_string(path).await?;
        let rewritten: String = original
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                !succeeded.iter().any(|u| *u == trimmed || prebid_monitor_loader::normalize_url(trimmed).as_deref() == Some(*u))
            })
            .collect::<Vec<_>>()
            .join("\n");

        tokio::fs::write(path, format!("{rewritten}\n")).await?;
        Ok(())
    }
}

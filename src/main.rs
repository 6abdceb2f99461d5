mod artifacts;
mod cli;
mod orchestrator;
mod probe;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use prebid_monitor_core::{AppConfig, RangeSpec};
use prebid_monitor_loader::UrlLoader;
use prebid_monitor_pool::{PoolConfig, WorkerPool};
use prebid_monitor_preflight::PreflightFilter;
use prebid_monitor_store::UrlStateStore;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::artifacts::ArtifactWriter;
use crate::cli::Cli;
use crate::orchestrator::{Orchestrator, RunOptions};

// Many short-lived browser tabs cycle through the worker pool; mimalloc
// releases memory back to the OS far more readily than glibc's allocator
// under that churn.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        info!(log_dir, "log-dir accepted for CLI compatibility; transport stays on stdout/tracing");
    }

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, falling back to embedded defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str).context("parsing config file")?;

    if let Some(chunk_size) = cli.chunk_size {
        config.general.chunk_size = chunk_size;
    }
    if let Some(concurrency) = cli.concurrency {
        config.general.concurrency = concurrency;
        config.pool.max_concurrency = concurrency;
    }
    if let Some(headless) = cli.headless {
        config.general.headless = headless;
    }
    if let Some(output_dir) = &cli.output_dir {
        config.artifacts.store_root = format!("{output_dir}/pages");
        config.artifacts.errors_root = format!("{output_dir}/errors");
    }

    let cli_range = cli.range.as_deref().map(parse_range_spec).transpose().context("parsing --range")?;
    let batch_range = batch::resolve_batch_range(&cli.batch)?;
    let range = batch_range.or(cli_range);

    let store = Arc::new(
        UrlStateStore::new(&config.database.path, config.general.max_retries)
            .await
            .context("opening url state store")?,
    );
    store.run_migrations().await.context("running url state store migrations")?;

    let artifacts = Arc::new(ArtifactWriter::new(
        config.artifacts.store_root.clone(),
        config.artifacts.errors_root.clone(),
    ));
    artifacts.ensure_dirs().await.context("creating artifact directories")?;

    let pool_config = PoolConfig {
        max_concurrency: config.pool.max_concurrency,
        max_pages_per_browser: config.pool.max_pages_per_browser,
        error_threshold: config.pool.error_threshold,
        acquire_timeout: Duration::from_secs(config.pool.acquire_timeout_secs),
        navigation_timeout: Duration::from_secs(config.pool.navigation_timeout_secs),
        probe_timeout: Duration::from_secs(config.pool.probe_timeout_secs),
        task_timeout: Duration::from_secs(config.pool.task_timeout_secs),
        headless: config.general.headless,
    };
    let pool = Arc::new(WorkerPool::new(pool_config, Arc::new(probe::PlaceholderProbe)));

    let preflight = config
        .preflight
        .enabled
        .then(|| PreflightFilter::new(config.preflight.dns_timeout_ms, config.preflight.tls_timeout_ms));

    let loader = UrlLoader::new();
    let orchestrator = Orchestrator::new(loader, Arc::clone(&store), Arc::clone(&pool), preflight, Arc::clone(&artifacts));

    let (cancel_tx, _cancel_rx) = broadcast::channel::<()>(1);
    {
        let cancel_tx = cancel_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received interrupt, cancelling in-flight work");
                let _ = cancel_tx.send(());
            }
        });
    }

    let source = cli.source.into_source();

    let options = RunOptions {
        source,
        range,
        skip_processed: cli.skip_processed,
        reset_tracking: cli.reset_tracking,
        prefilter_processed: cli.prefilter_processed,
        force_reprocess: cli.force_reprocess,
        chunk_size: config.general.chunk_size,
        rewrite_input: cli.skip_processed,
        retry_pending: cli.retry_pending,
    };

    let summary = orchestrator.run(options, &cancel_tx).await?;
    summary.emit();

    if let Some(progress_path) = &cli.batch.resume_batch {
        batch::write_progress(progress_path, &cli.batch, &summary).await?;
    }

    Ok(())
}

fn parse_range_spec(raw: &str) -> Result<RangeSpec> {
    let (start, end) = raw.split_once('-').with_context(|| format!("range {raw:?} must be \"start-end\""))?;
    let start: usize = start.trim().parse().context("parsing range start")?;
    let end: usize = end.trim().parse().context("parsing range end")?;
    Ok(RangeSpec::new(start, end)?)
}

/// External-driven batch paging: each invocation processes one window
/// computed from `start-url`/`batch-size`, optionally resuming from a
/// progress file left by the previous invocation.
mod batch {
    use super::*;
    use crate::cli::BatchArgs;
    use crate::orchestrator::ScanSummary;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct BatchProgress {
        last_completed_index: u64,
        total_urls: u64,
        updated_at: chrono::DateTime<chrono::Utc>,
    }

    pub fn resolve_batch_range(batch: &BatchArgs) -> Result<Option<RangeSpec>> {
        if !batch.batch_mode {
            return Ok(None);
        }
        let batch_size = batch.batch_size.context("--batch-mode requires --batch-size")?;
        let total_urls = batch.total_urls.context("--batch-mode requires --total-urls")?;

        let resumed_start = match &batch.resume_batch {
            Some(path) => std::fs::read_to_string(path)
                .ok()
                .and_then(|raw| serde_json::from_str::<BatchProgress>(&raw).ok())
                .map(|p| p.last_completed_index as usize + 1),
            None => None,
        };

        let start = resumed_start.or(batch.start_url).unwrap_or(1);
        if start > total_urls {
            return Ok(None);
        }
        let end = start.saturating_add(batch_size).saturating_sub(1).min(total_urls);
        Ok(Some(RangeSpec::new(start, end)?))
    }

    pub async fn write_progress(path: &str, batch: &BatchArgs, summary: &ScanSummary) -> Result<()> {
        let last_completed_index =
            batch.start_url.unwrap_or(1).saturating_add(summary.total_in_scope).saturating_sub(1) as u64;
        let progress = BatchProgress {
            last_completed_index,
            total_urls: batch.total_urls.unwrap_or(0) as u64,
            updated_at: chrono::Utc::now(),
        };
        let serialized = serde_json::to_string_pretty(&progress)?;
        tokio::fs::write(path, serialized)
            .await
            .with_context(|| format!("writing batch progress to {path}"))?;
        info!(path, "batch progress written");
        Ok(())
    }
}

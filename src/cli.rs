use clap::{Args, Parser};

/// Crawl orchestration engine for Prebid.js fingerprint discovery.
#[derive(Parser, Debug)]
#[command(name = "prebid-monitor", about = "Prebid.js crawl orchestration engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(flatten)]
    pub source: SourceArgs,

    /// 1-based inclusive range into the resolved corpus, e.g. "1-500".
    #[arg(long)]
    pub range: Option<String>,

    /// Filter the corpus down to URLs not already processed, bootstrapping
    /// from existing artifacts if the store is empty.
    #[arg(long = "skip-processed")]
    pub skip_processed: bool,

    /// Clear the URL State Store before loading the corpus.
    #[arg(long = "reset-tracking")]
    pub reset_tracking: bool,

    /// Compute range analysis and next-range suggestions without dispatching
    /// any URL to the worker pool.
    #[arg(long = "prefilter-processed")]
    pub prefilter_processed: bool,

    /// Disable the State-Store dedup filter even if `--skip-processed` is set.
    #[arg(long = "force-reprocess")]
    pub force_reprocess: bool,

    /// Skip corpus loading entirely and dispatch exactly the URLs the store
    /// currently holds in `retry` status (an explicit retry pass).
    #[arg(long = "retry-pending")]
    pub retry_pending: bool,

    /// Batch size for dispatch to the worker pool.
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,

    /// Worker Pool max_concurrency (pages in flight).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Run the browser headless (default true).
    #[arg(long)]
    pub headless: Option<bool>,

    /// Artifact store root (overrides config `[artifacts].store_root`).
    #[arg(long = "output-dir")]
    pub output_dir: Option<String>,

    /// Log directory. Accepted for interface compatibility; log transport
    /// stays on stdout/tracing regardless.
    #[arg(long = "log-dir")]
    pub log_dir: Option<String>,

    #[command(flatten)]
    pub batch: BatchArgs,
}

/// Exactly one source selector chooses the Loader path.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Local file path (plain-text or CSV) containing candidate URLs.
    #[arg(long = "input-file")]
    pub input_file: Option<String>,

    /// Remote text/CSV URL containing candidate URLs.
    #[arg(long = "remote-url")]
    pub remote_url: Option<String>,

    /// Code-host "blob" URL, normalized to raw content before fetching.
    #[arg(long = "blob-url")]
    pub blob_url: Option<String>,
}

/// External-driven paging over the corpus: repeated invocations with
/// different ranges computed from these fields, tracked by a per-batch JSON
/// progress file.
#[derive(Args, Debug, Default)]
pub struct BatchArgs {
    #[arg(long = "batch-mode")]
    pub batch_mode: bool,

    #[arg(long = "start-url")]
    pub start_url: Option<usize>,

    #[arg(long = "total-urls")]
    pub total_urls: Option<usize>,

    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,

    /// Path to the per-batch progress file; read if present to resume,
    /// written after the batch completes.
    #[arg(long = "resume-batch")]
    pub resume_batch: Option<String>,
}

impl SourceArgs {
    pub fn into_source(self) -> prebid_monitor_loader::Source {
        if let Some(path) = self.input_file {
            prebid_monitor_loader::Source::FilePath(path)
        } else if let Some(url) = self.remote_url {
            prebid_monitor_loader::Source::RemoteTextUrl(url)
        } else {
            prebid_monitor_loader::Source::CodeHostBlobUrl(
                self.blob_url
                    .expect("clap group guarantees exactly one source field is set"),
            )
        }
    }
}

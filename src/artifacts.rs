//! Artifact Writer: durable per-day `PageData` JSON arrays and append-only
//! URL classification files. Writes for a given day are serialized under a
//! per-file mutex so two chunks completing close together never race on
//! the same file's append-or-create.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dashmap::DashMap;
use prebid_monitor_core::{Outcome, PageData};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Error codes that land in `navigation_errors.txt` rather than the
/// catch-all `error_processing.txt`.
const NAVIGATION_CODES: &[&str] = &[
    "DNS_UNRESOLVED",
    "TLS_INVALID",
    "TLS_EXPIRED",
    "CONNECTION_REFUSED",
];

pub struct ArtifactWriter {
    store_root: PathBuf,
    errors_root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ArtifactWriter {
    pub fn new(store_root: impl Into<PathBuf>, errors_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            errors_root: errors_root.into(),
            locks: DashMap::new(),
        }
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.store_root)
            .await
            .with_context(|| format!("creating artifact store root {}", self.store_root.display()))?;
        tokio::fs::create_dir_all(&self.errors_root)
            .await
            .with_context(|| format!("creating artifact errors root {}", self.errors_root.display()))?;
        Ok(())
    }

    /// Route one outcome to its durable artifact(s): `Success` goes into
    /// the day's JSON array; every other outcome appends its URL to the
    /// matching classification text file. Must be called before the
    /// corresponding State Store update commits: a crash between the two
    /// must leave a record that still needs processing, never one that
    /// looks done but has no artifact.
    pub async fn record(&self, outcome: &Outcome) -> Result<()> {
        match outcome {
            Outcome::Success { page_data } => self.append_page_data(page_data).await,
            Outcome::NoData { url } => self.append_url(self.errors_root.join("no_prebid.txt"), url).await,
            Outcome::Error { url, code, .. } => {
                let file = if NAVIGATION_CODES.contains(&code.as_str()) {
                    "navigation_errors.txt"
                } else {
                    "error_processing.txt"
                };
                self.append_url(self.errors_root.join(file), url).await
            }
        }
    }

    pub async fn record_batch(&self, outcomes: &[Outcome]) -> Result<()> {
        for outcome in outcomes {
            self.record(outcome).await?;
        }
        Ok(())
    }

    async fn append_page_data(&self, page_data: &PageData) -> Result<()> {
        let path = self.day_file_path(page_data)?;
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut existing: Vec<PageData> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(pages) => pages,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "day artifact failed to parse, renaming aside");
                    self.rename_corrupt(&path).await;
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        existing.push(page_data.clone());
        let serialized = serde_json::to_string_pretty(&existing)?;
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(serialized.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn rename_corrupt(&self, path: &Path) {
        let corrupt_path = path.with_extension(format!(
            "json.corrupt.{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        ));
        if let Err(e) = tokio::fs::rename(path, &corrupt_path).await {
            warn!(file = %path.display(), error = %e, "failed to rename corrupt artifact aside");
        }
    }

    async fn append_url(&self, path: PathBuf, url: &str) -> Result<()> {
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(url.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    fn day_file_path(&self, page_data: &PageData) -> Result<PathBuf> {
        let date = NaiveDate::parse_from_str(&page_data.date, "%Y-%m-%d")
            .with_context(|| format!("page_data.date {} is not YYYY-MM-DD", page_data.date))?;
        let month_dir = date.format("%b-%Y").to_string();
        let day_file = format!("{}.json", date.format("%Y-%m-%d"));
        Ok(self.store_root.join(month_dir).join(day_file))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Count outcomes by error code, for the structured scan summary.
pub fn errors_by_code(outcomes: &[Outcome]) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for outcome in outcomes {
        if let Outcome::Error { code, .. } = outcome {
            *counts.entry(code.clone()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use prebid_monitor_core::PrebidInstance;
    use tempfile::tempdir;

    fn page(url: &str, date: &str, has_prebid: bool) -> PageData {
        PageData {
            url: url.to_string(),
            date: date.to_string(),
            libraries: vec![],
            prebid_instances: if has_prebid {
                vec![PrebidInstance {
                    global_var_name: "pbjs".into(),
                    version: Some("8.0.0".into()),
                    modules: vec![],
                }]
            } else {
                vec![]
            },
        }
    }

    #[tokio::test]
    async fn day_file_append_or_create_accumulates() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("pages"), dir.path().join("errors"));

        writer
            .record(&Outcome::Success { page_data: page("https://a.example", "2026-07-28", true) })
            .await
            .unwrap();
        writer
            .record(&Outcome::Success { page_data: page("https://b.example", "2026-07-28", false) })
            .await
            .unwrap();

        let path = dir.path().join("pages/Jul-2026/2026-07-28.json");
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<PageData> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].url, "https://a.example");
        assert_eq!(parsed[1].url, "https://b.example");
    }

    #[tokio::test]
    async fn corrupt_day_file_is_renamed_aside_not_lost_silently() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("pages"), dir.path().join("errors"));
        let path = dir.path().join("pages/Jul-2026/2026-07-28.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not valid json").await.unwrap();

        writer
            .record(&Outcome::Success { page_data: page("https://a.example", "2026-07-28", false) })
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<PageData> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);

        let mut renamed = Vec::new();
        let mut entries = tokio::fs::read_dir(path.parent().unwrap()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains("corrupt") {
                renamed.push(name);
            }
        }
        assert_eq!(renamed.len(), 1);
    }

    #[tokio::test]
    async fn no_data_appends_to_no_prebid_file() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("pages"), dir.path().join("errors"));
        writer
            .record(&Outcome::NoData { url: "https://a.example".into() })
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("errors/no_prebid.txt")).await.unwrap();
        assert_eq!(raw.trim(), "https://a.example");
    }

    #[tokio::test]
    async fn navigation_vs_generic_error_split_by_code() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("pages"), dir.path().join("errors"));

        writer
            .record(&Outcome::Error {
                url: "https://dns-fail.example".into(),
                code: "DNS_UNRESOLVED".into(),
                message: "no such host".into(),
                stack: None,
            })
            .await
            .unwrap();
        writer
            .record(&Outcome::Error {
                url: "https://other-fail.example".into(),
                code: "PROCESSING_ERROR".into(),
                message: "boom".into(),
                stack: None,
            })
            .await
            .unwrap();

        let nav = tokio::fs::read_to_string(dir.path().join("errors/navigation_errors.txt")).await.unwrap();
        let generic = tokio::fs::read_to_string(dir.path().join("errors/error_processing.txt")).await.unwrap();
        assert_eq!(nav.trim(), "https://dns-fail.example");
        assert_eq!(generic.trim(), "https://other-fail.example");
    }
}

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub preflight: PreflightConfig,
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_pages_per_browser")]
    pub max_pages_per_browser: usize,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreflightConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
    #[serde(default = "default_tls_timeout_ms")]
    pub tls_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    pub store_root: String,
    pub errors_root: String,
}

fn default_max_retries() -> u32 {
    3
}
fn default_chunk_size() -> usize {
    100
}
fn default_concurrency() -> usize {
    5
}
fn default_headless() -> bool {
    true
}
fn default_max_concurrency() -> usize {
    5
}
fn default_max_pages_per_browser() -> usize {
    50
}
fn default_error_threshold() -> u32 {
    5
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_navigation_timeout_secs() -> u64 {
    60
}
fn default_probe_timeout_secs() -> u64 {
    30
}
fn default_task_timeout_secs() -> u64 {
    120
}
fn default_dns_timeout_ms() -> u64 {
    2_000
}
fn default_tls_timeout_ms() -> u64 {
    3_000
}

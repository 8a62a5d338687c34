//! Engine configuration, assembled by the CLI layer from `structopt` flags
//! and handed to [`crate::orchestrator`] as a single value.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub index_dir: PathBuf,
    pub base_url: String,
    pub out_dir: PathBuf,
    pub bundles_out: Option<PathBuf>,
    pub manifest_path: PathBuf,
    pub concurrency: usize,
    pub retries: u32,
    pub request_timeout: std::time::Duration,
    pub bundle_threshold_bytes: u64,
    pub include_yanked: bool,
    pub limit: Option<usize>,
    pub checksum_file: Option<PathBuf>,
    pub progress_every: u64,
    pub progress_interval: std::time::Duration,
    pub user_agent: String,
}

impl EngineConfig {
    /// Channel capacity between the index scanner and the fetch worker
    /// pool: twice the worker count, so a burst of completions doesn't
    /// starve the scanner while still bounding in-flight memory.
    pub fn channel_capacity(&self) -> usize {
        self.concurrency.saturating_mul(2).max(1)
    }
}

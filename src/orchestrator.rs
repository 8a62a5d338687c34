//! Wires the index scanner, checksum index, fetch worker pool, manifest
//! writer, bundler and progress reporters into one run, and owns the
//! lifecycle: startup, graceful cancellation on Ctrl-C, and shutdown.

use crate::bundle::Bundler;
use crate::checksum::ChecksumIndex;
use crate::config::EngineConfig;
use crate::index::{self, ScanOptions};
use crate::manifest::ManifestWriter;
use crate::metrics::{Metrics, Snapshot};
use crate::fetch;
use anyhow::{Context, Error};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs a full mirror pass described by `cfg` to completion, or until the
/// calling task's future is dropped / a Ctrl-C signal arrives, whichever
/// is first. Returns the final counters on success.
pub async fn run(cfg: EngineConfig) -> Result<Snapshot, Error> {
    let cfg = Arc::new(cfg);

    let mut checksums = ChecksumIndex::new();
    if let Some(path) = &cfg.checksum_file {
        let loaded = checksums
            .load_external(path)
            .with_context(|| format!("failed to load checksum file {}", path.display()))?;
        info!(loaded, "external checksums loaded");
    }

    let index_dir = cfg.index_dir.clone();
    let base_url = cfg.base_url.clone();
    let include_yanked = cfg.include_yanked;
    let limit = cfg.limit;

    let mut descriptors = tokio::task::spawn_blocking(move || {
        index::scan(
            &index_dir,
            &ScanOptions {
                base_url: &base_url,
                include_yanked,
                limit,
            },
        )
    })
    .await
    .context("index scan task panicked")?;

    if !checksums.is_empty() {
        index::apply_checksums(&mut descriptors, &checksums);
    }

    let metrics = Metrics::new();
    metrics.discovered(descriptors.len() as u64);
    info!(discovered = descriptors.len(), "index scan complete");

    let manifest = Arc::new(ManifestWriter::create(&cfg.manifest_path).await?);
    let bundler = Bundler::new(cfg.bundles_out.clone(), cfg.bundle_threshold_bytes)?;

    let client = Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.request_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let (tx, rx) = mpsc::channel(cfg.channel_capacity());

    let feeder = tokio::spawn(async move {
        for d in descriptors {
            if tx.send(d).await.is_err() {
                break;
            }
        }
    });

    // Aborting the feeder stops new descriptors from being fed in; the
    // `CancellationToken` reaches further, into every in-flight worker's
    // current HTTP request and any pending backoff sleep. The worker pool
    // itself is always awaited to completion below, never raced away,
    // so every worker's clone of `manifest`/`bundler` is guaranteed to
    // drop before we try to reclaim sole ownership of them.
    let feeder_abort = feeder.abort_handle();
    let cancel = CancellationToken::new();
    let ctrl_c_watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down gracefully");
                feeder_abort.abort();
                cancel.cancel();
            }
        }
    });

    let (reporter_cancel_tx, reporter_cancel_rx) = tokio::sync::oneshot::channel();
    let reporter = metrics.spawn_interval_reporter(cfg.progress_interval, reporter_cancel_rx);

    fetch::run(
        rx,
        client,
        cfg.clone(),
        metrics.clone(),
        manifest.clone(),
        bundler.clone(),
        cancel,
    )
    .await?;

    ctrl_c_watcher.abort();
    let _ = feeder.await;
    let _ = reporter_cancel_tx.send(());
    let _ = reporter.await;

    bundler.close().await?;
    let manifest = Arc::try_unwrap(manifest)
        .unwrap_or_else(|arc| panic!("manifest writer still has {} other references", Arc::strong_count(&arc) - 1));
    manifest.close().await?;

    metrics.log_final();
    Ok(metrics.snapshot())
}

/// Converts a GiB floating-point threshold (as accepted on the CLI) into
/// the byte count the bundler works in.
pub fn gib_to_bytes(gib: f64) -> u64 {
    (gib * 1024.0 * 1024.0 * 1024.0).round() as u64
}

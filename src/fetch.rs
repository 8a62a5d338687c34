//! The Fetch Worker Pool: a fixed number of tokio tasks pulling
//! [`FetchDescriptor`]s off a shared channel, each retrying a streamed
//! HTTP GET with exponential backoff, verifying the result, and handing
//! it off to the manifest writer and (optionally) the bundler.

use crate::bundle::Bundler;
use crate::config::EngineConfig;
use crate::manifest::ManifestWriter;
use crate::metrics::Metrics;
use crate::{util, verify, FetchDescriptor, Record, Status};
use anyhow::{Context, Error};
use chrono::Utc;
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_futures::Instrument;

/// Runs `cfg.concurrency` workers against `rx` until the channel is
/// closed and drained, or `cancel` fires. Each worker independently
/// locks `rx` to pull its next descriptor, so the pool self-balances
/// without a dispatcher task. A worker already mid-download watches
/// `cancel` too, so an interrupt reaches in-flight requests and pending
/// backoff sleeps, not just the feed of new work.
pub async fn run(
    rx: mpsc::Receiver<FetchDescriptor>,
    client: Client,
    cfg: Arc<EngineConfig>,
    metrics: Metrics,
    manifest: Arc<ManifestWriter>,
    bundler: Bundler,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let rx = Arc::new(Mutex::new(rx));

    let mut handles = Vec::with_capacity(cfg.concurrency);
    for id in 0..cfg.concurrency {
        let rx = rx.clone();
        let client = client.clone();
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let manifest = manifest.clone();
        let bundler = bundler.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(
            async move {
                loop {
                    let descriptor = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(descriptor) = descriptor else {
                        break;
                    };

                    let record = process(&client, &cfg, &descriptor, &bundler, &metrics, &cancel).await;
                    match record.status {
                        Status::Ok => metrics.completed_ok(record.size),
                        Status::Skipped => metrics.skipped(),
                        Status::Error => {
                            metrics.failed();
                            warn!(url = %descriptor.url, error = ?record.error, "fetch failed");
                        }
                    }
                    metrics.add_retries(record.retries as u64);
                    metrics.report_every(cfg.progress_every);

                    if let Err(e) = manifest.write(&record).await {
                        warn!(error = %e, "failed to append manifest record");
                    }
                }
            }
            .instrument(tracing::debug_span!("worker", id)),
        ));
    }

    for handle in handles {
        handle.await.context("fetch worker task panicked")?;
    }

    Ok(())
}

/// Whether an HTTP status warrants a retry rather than an immediate
/// failure: 408, 425, 429 and any 5xx. Other 4xx statuses are permanent.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS
    ) || status.is_server_error()
}

enum DownloadError {
    Retryable(Error),
    Permanent(Error),
}

async fn process(
    client: &Client,
    cfg: &EngineConfig,
    descriptor: &FetchDescriptor,
    bundler: &Bundler,
    metrics: &Metrics,
    cancel: &CancellationToken,
) -> Record {
    let started_at = Utc::now();
    let target = crate::shard::shard_path(&cfg.out_dir, &descriptor.name, &descriptor.version);

    if target.exists() {
        if let Ok(result) = verify::hash_file(&target, descriptor.expected_sha256.as_deref()).await {
            if result.matches {
                debug!(url = %descriptor.url, "already present, skipping");
                return Record {
                    schema_version: crate::MANIFEST_SCHEMA_VERSION,
                    url: descriptor.url.clone(),
                    path: target.display().to_string(),
                    size: std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0),
                    sha256: result.sha256_hex,
                    started_at,
                    finished_at: Utc::now(),
                    ok: true,
                    status: Status::Skipped,
                    error: None,
                    retries: 0,
                };
            }
        }
    }

    match attempt_download(client, cfg, descriptor, &target, metrics, cancel).await {
        Ok((sha256_hex, size, retries)) => {
            if let Err(e) = bundler
                .add_file(
                    target.clone(),
                    util::host_of(&descriptor.url),
                    descriptor.filename(),
                )
                .await
            {
                warn!(url = %descriptor.url, error = %e, "failed to append to bundle");
            }

            Record {
                schema_version: crate::MANIFEST_SCHEMA_VERSION,
                url: descriptor.url.clone(),
                path: target.display().to_string(),
                size,
                sha256: sha256_hex,
                started_at,
                finished_at: Utc::now(),
                ok: true,
                status: Status::Ok,
                error: None,
                retries,
            }
        }
        Err((e, retries)) => Record {
            schema_version: crate::MANIFEST_SCHEMA_VERSION,
            url: descriptor.url.clone(),
            path: target.display().to_string(),
            size: 0,
            sha256: String::new(),
            started_at,
            finished_at: Utc::now(),
            ok: false,
            status: Status::Error,
            error: Some(format!("{e:#}")),
            retries,
        },
    }
}

/// Runs the HTTP-level retry loop: fetches `descriptor.url` into a
/// sibling `.part` file, retrying only on transport errors or retryable
/// statuses. Checksum verification happens once, after this loop exits,
/// matching the spec's separation between HTTP retries and a single
/// post-loop integrity check. Returns the number of retries consumed
/// alongside the outcome. `cancel` is checked before every attempt and
/// raced against both the request itself and the backoff sleep, so a
/// cancellation reaches an in-flight download or a pending retry instead
/// of only stopping new descriptors from being fed in.
async fn attempt_download(
    client: &Client,
    cfg: &EngineConfig,
    descriptor: &FetchDescriptor,
    target: &std::path::Path,
    metrics: &Metrics,
    cancel: &CancellationToken,
) -> Result<(String, u64, u32), (Error, u32)> {
    if let Some(parent) = target.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Err((Error::new(e).context("failed to create shard directory"), 0));
        }
    }

    let part_path = part_path_for(target);
    let mut last_err = None;
    let mut got_body = false;
    let mut retries_consumed = cfg.retries;

    for attempt in 0..=cfg.retries {
        if cancel.is_cancelled() {
            last_err = Some(anyhow::anyhow!("cancelled"));
            retries_consumed = attempt;
            break;
        }

        metrics.request_started();
        let outcome = download_once(client, &descriptor.url, &part_path, cancel).await;
        metrics.request_finished();

        match outcome {
            Ok(()) => {
                got_body = true;
                retries_consumed = attempt;
                break;
            }
            Err(DownloadError::Permanent(e)) => {
                last_err = Some(e);
                retries_consumed = attempt;
                break;
            }
            Err(DownloadError::Retryable(e)) => {
                last_err = Some(e);
                if attempt < cfg.retries {
                    let jitter: f64 = rand::thread_rng().gen();
                    tokio::select! {
                        _ = tokio::time::sleep(util::backoff_delay(attempt, jitter)) => {}
                        _ = cancel.cancelled() => {
                            retries_consumed = attempt;
                            break;
                        }
                    }
                }
            }
        }
    }

    if !got_body {
        tokio::fs::remove_file(&part_path).await.ok();
        return Err((
            last_err.unwrap_or_else(|| anyhow::anyhow!("download failed with no recorded error")),
            retries_consumed,
        ));
    }

    match verify::hash_file(&part_path, descriptor.expected_sha256.as_deref()).await {
        Ok(result) if result.matches => {
            let size = tokio::fs::metadata(&part_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            match tokio::fs::rename(&part_path, target).await {
                Ok(()) => Ok((result.sha256_hex, size, retries_consumed)),
                Err(e) => {
                    tokio::fs::remove_file(&part_path).await.ok();
                    Err((Error::new(e).context("failed to move into place"), retries_consumed))
                }
            }
        }
        Ok(result) => {
            tokio::fs::remove_file(&part_path).await.ok();
            Err((
                anyhow::anyhow!(
                    "checksum mismatch: expected {:?}, got {}",
                    descriptor.expected_sha256,
                    result.sha256_hex
                ),
                retries_consumed,
            ))
        }
        Err(e) => {
            tokio::fs::remove_file(&part_path).await.ok();
            Err((e, retries_consumed))
        }
    }
}

/// Appends a `.part` suffix to the full artifact filename rather than
/// replacing its extension, so `name-1.0.0.crate` stages as
/// `name-1.0.0.crate.part` and not `name-1.0.0.part`.
fn part_path_for(target: &std::path::Path) -> std::path::PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// Runs one download attempt, racing the whole thing against `cancel` so
/// a cancellation fired mid-request aborts the in-flight HTTP call and
/// its body stream instead of waiting for them to finish naturally.
async fn download_once(
    client: &Client,
    url: &str,
    part_path: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<(), DownloadError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Permanent(anyhow::anyhow!("cancelled"))),
        result = download_body(client, url, part_path) => result,
    }
}

async fn download_body(
    client: &Client,
    url: &str,
    part_path: &std::path::Path,
) -> Result<(), DownloadError> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request failed for {url}"))
        .map_err(DownloadError::Retryable)?;

    let status = response.status();
    if !status.is_success() {
        let err = anyhow::anyhow!("server returned status {status} for {url}");
        return Err(if is_retryable_status(status) {
            DownloadError::Retryable(err)
        } else {
            DownloadError::Permanent(err)
        });
    }

    let mut file = tokio::fs::File::create(part_path)
        .await
        .with_context(|| format!("failed to create {}", part_path.display()))
        .map_err(DownloadError::Retryable)?;

    let mut stream = response.bytes_stream();
    use tokio_stream::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .with_context(|| format!("stream error while downloading {url}"))
            .map_err(DownloadError::Retryable)?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("failed to write {}", part_path.display()))
            .map_err(DownloadError::Retryable)?;
    }
    file.flush()
        .await
        .context("failed to flush download")
        .map_err(DownloadError::Retryable)?;

    Ok(())
}

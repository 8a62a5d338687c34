use anyhow::Error;
use crate_mirror::config::EngineConfig;
use crate_mirror::orchestrator;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tracing::info;

fn parse_secs(s: &str) -> Result<Duration, Error> {
    Ok(Duration::from_secs(s.parse()?))
}

/// `max(64, 32 * available parallelism)`, falling back to 64 if the
/// platform can't report a core count.
fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (32 * cores).max(64)
}

#[derive(StructOpt)]
pub struct Args {
    /// Path to the root of a crates.io-index checkout to scan
    #[structopt(long = "index-dir", parse(from_os_str))]
    index_dir: PathBuf,
    /// Base URL artifacts are served from, e.g. https://static.crates.io/crates
    #[structopt(long = "base-url")]
    base_url: String,
    /// Directory artifacts are written into, sharded by crate name
    #[structopt(long = "out-dir", parse(from_os_str))]
    out_dir: PathBuf,
    /// When set, also streams completed artifacts into rotating tar.zst
    /// bundles under this directory
    #[structopt(long = "bundles-out", parse(from_os_str))]
    bundles_out: Option<PathBuf>,
    /// Path to the JSON Lines manifest recording one line per attempted fetch
    #[structopt(long = "manifest", default_value = "manifest.jsonl", parse(from_os_str))]
    manifest: PathBuf,
    /// Number of concurrent fetch workers. Defaults to
    /// `max(64, 32 * available parallelism)` when unset.
    #[structopt(short = "c", long = "concurrency")]
    concurrency: Option<usize>,
    /// Number of retries per descriptor after the first attempt
    #[structopt(long = "retries", default_value = "5")]
    retries: u32,
    /// Per-request timeout, in seconds
    #[structopt(
        long = "request-timeout",
        default_value = "300",
        parse(try_from_str = parse_secs)
    )]
    request_timeout: Duration,
    /// Uncompressed byte threshold per bundle, in GiB, before rotating to a
    /// new bundle file
    #[structopt(long = "bundle-threshold-gib", default_value = "1.0")]
    bundle_threshold_gib: f64,
    /// Include yanked index entries, which are skipped by default
    #[structopt(long = "include-yanked")]
    include_yanked: bool,
    /// Stop scanning once this many descriptors have been discovered
    #[structopt(long = "limit")]
    limit: Option<usize>,
    /// Path to an external JSON Lines `{url, sha256}` file that overrides
    /// or supplements checksums found in the index
    #[structopt(long = "checksum-file", parse(from_os_str))]
    checksum_file: Option<PathBuf>,
    /// Log a progress line every N completed/skipped/failed descriptors;
    /// 0 disables count-based reporting
    #[structopt(long = "progress-every", default_value = "500")]
    progress_every: u64,
    /// Log a progress line on this interval, in seconds; 0 disables
    /// time-based reporting
    #[structopt(
        long = "progress-interval",
        default_value = "30",
        parse(try_from_str = parse_secs)
    )]
    progress_interval: Duration,
}

pub(crate) async fn cmd(args: Args) -> Result<(), Error> {
    let cfg = EngineConfig {
        index_dir: args.index_dir,
        base_url: args.base_url,
        out_dir: args.out_dir,
        bundles_out: args.bundles_out,
        manifest_path: args.manifest,
        concurrency: args.concurrency.unwrap_or_else(default_concurrency).max(1),
        retries: args.retries,
        request_timeout: args.request_timeout,
        bundle_threshold_bytes: orchestrator::gib_to_bytes(args.bundle_threshold_gib),
        include_yanked: args.include_yanked,
        limit: args.limit,
        checksum_file: args.checksum_file,
        progress_every: args.progress_every,
        progress_interval: args.progress_interval,
        user_agent: crate_mirror::util::USER_AGENT.to_owned(),
    };

    let snapshot = orchestrator::run(cfg).await?;
    info!(
        discovered = snapshot.discovered,
        completed = snapshot.completed,
        skipped = snapshot.skipped,
        failed = snapshot.failed,
        "mirror command finished"
    );

    Ok(())
}

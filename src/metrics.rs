//! Aggregate counters for a mirror run, plus two independent progress
//! reporters: one fires every N completions, the other on a wall-clock
//! tick. Both just log through `tracing`; there is no metrics exporter
//! here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Default)]
struct Counters {
    discovered: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Metrics {
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub discovered: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes: u64,
    pub retries: u64,
    pub in_flight: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discovered(&self, n: u64) {
        self.counters.discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn completed_ok(&self, bytes: u64) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the running retry count; called once per descriptor with
    /// however many retries it consumed.
    pub fn add_retries(&self, n: u64) {
        if n > 0 {
            self.counters.retries.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Marks one more HTTP request as currently in flight.
    pub fn request_started(&self) {
        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks an in-flight HTTP request as finished, however it ended.
    pub fn request_finished(&self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            discovered: self.counters.discovered.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
        }
    }

    /// Total of completed + skipped + failed, the count that should
    /// eventually reach `discovered` once the run drains.
    pub fn processed(&self) -> u64 {
        let s = self.snapshot();
        s.completed + s.skipped + s.failed
    }

    fn log_progress(&self, records_per_sec: Option<f64>) {
        let s = self.snapshot();
        info!(
            discovered = s.discovered,
            completed = s.completed,
            skipped = s.skipped,
            failed = s.failed,
            bytes = s.bytes,
            retries = s.retries,
            in_flight = s.in_flight,
            records_per_sec,
            "progress"
        );
    }

    /// Logs progress immediately after every `every`th completed/skipped/
    /// failed descriptor. A value of 0 disables count-based reporting.
    pub fn report_every(&self, every: u64) {
        if every == 0 {
            return;
        }
        if self.processed() % every == 0 {
            self.log_progress(None);
        }
    }

    /// Spawns a task that, on a fixed interval until `cancel` resolves,
    /// logs a progress line plus a records/second rate computed since the
    /// reporter started — but only if at least one record advanced since
    /// the previous tick. A zero interval disables time-based reporting
    /// and the returned handle completes immediately.
    pub fn spawn_interval_reporter(
        &self,
        interval: Duration,
        mut cancel: tokio::sync::oneshot::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = self.clone();
        tokio::spawn(async move {
            if interval.is_zero() {
                return;
            }
            let start = tokio::time::Instant::now();
            let mut last_processed = metrics.processed();
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let processed = metrics.processed();
                        if processed > last_processed {
                            let rate = processed as f64 / start.elapsed().as_secs_f64();
                            metrics.log_progress(Some(rate));
                            last_processed = processed;
                        }
                    }
                    _ = &mut cancel => break,
                }
            }
        })
    }

    pub fn log_final(&self) {
        let s = self.snapshot();
        info!(
            discovered = s.discovered,
            completed = s.completed,
            skipped = s.skipped,
            failed = s.failed,
            bytes = s.bytes,
            retries = s.retries,
            "mirror run finished"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.discovered(10);
        m.completed_ok(100);
        m.completed_ok(50);
        m.skipped();
        m.failed();
        m.add_retries(2);
        m.add_retries(0);
        m.request_started();
        m.request_started();
        m.request_finished();

        let s = m.snapshot();
        assert_eq!(s.discovered, 10);
        assert_eq!(s.completed, 2);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.bytes, 150);
        assert_eq!(s.retries, 2);
        assert_eq!(s.in_flight, 1);
        assert_eq!(m.processed(), 4);
    }

    #[tokio::test]
    async fn interval_reporter_stops_on_cancel() {
        let m = Metrics::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = m.spawn_interval_reporter(Duration::from_millis(10), rx);
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly after cancel")
            .unwrap();
    }
}

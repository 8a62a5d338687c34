//! Small helpers shared across the engine: backoff scheduling and URL
//! host extraction for bundle entry naming.

use std::time::Duration;

pub const USER_AGENT: &str = concat!("crate-mirror/", env!("CARGO_PKG_VERSION"));

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff, base doubled per attempt and capped, multiplied by
/// a jitter factor in `[0.5, 1.5)`. `attempt` is 0-based (the delay before
/// the *next* attempt, i.e. after `attempt + 1` attempts have failed).
pub fn backoff_delay(attempt: u32, jitter: f64) -> Duration {
    debug_assert!((0.0..1.0).contains(&jitter));

    let exp = attempt.min(20); // avoid overflow in the shift below
    let base = BACKOFF_BASE
        .checked_mul(1u32 << exp)
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP);

    let factor = 0.5 + jitter; // maps [0, 1) -> [0.5, 1.5)
    base.mul_f64(factor)
}

/// Extracts the host component of a URL for use as the bundle's tar entry
/// prefix, e.g. `https://static.crates.io/crates/serde/serde-1.0.0.crate`
/// -> `static.crates.io`. Falls back to `"unknown-host"` for URLs that
/// fail to parse or lack a host.
pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown-host".to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let d0 = backoff_delay(0, 0.0);
        let d1 = backoff_delay(1, 0.0);
        assert_eq!(d0, Duration::from_millis(250));
        assert_eq!(d1, Duration::from_millis(500));

        let huge = backoff_delay(30, 0.0);
        assert!(huge <= BACKOFF_CAP.mul_f64(1.5));
    }

    #[test]
    fn jitter_within_bounds() {
        let base = backoff_delay(2, 0.0);
        let max = backoff_delay(2, 0.999999);
        assert!(max > base);
    }

    #[test]
    fn host_extraction() {
        assert_eq!(
            host_of("https://static.crates.io/crates/serde/serde-1.0.0.crate"),
            "static.crates.io"
        );
        assert_eq!(host_of("not a url"), "unknown-host");
    }
}

//! Request counters.
//!
//! Cheap atomic counters, periodically emitted as a structured log line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests: AtomicU64,
    pub forwarded: AtomicU64,
    pub auth_failures: AtomicU64,
    pub upstream_errors: AtomicU64,
}

impl Metrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Emit a counter snapshot once a minute until shutdown.
pub async fn run_reporter(
    metrics: std::sync::Arc<Metrics>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(REPORT_INTERVAL) => {
                info!(
                    requests = metrics.requests.load(Ordering::Relaxed),
                    forwarded = metrics.forwarded.load(Ordering::Relaxed),
                    auth_failures = metrics.auth_failures.load(Ordering::Relaxed),
                    upstream_errors = metrics.upstream_errors.load(Ordering::Relaxed),
                    "gateway counters"
                );
            }
            _ = shutdown.changed() => return,
        }
    }
}

//! Consumer progress counters and the once-per-second reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Counters shared between the read loop and the reporter.
#[derive(Debug)]
pub struct ConsumerStats {
    started: Instant,
    messages: AtomicU64,
    errors: AtomicU64,
}

impl Default for ConsumerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::compute(self.messages(), self.errors(), self.started.elapsed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub messages: u64,
    pub errors: u64,
    pub rate: f64,
}

impl ProgressSnapshot {
    pub fn compute(messages: u64, errors: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            messages as f64 / secs
        } else {
            0.0
        };
        Self {
            messages,
            errors,
            rate,
        }
    }
}

/// Logs a progress report every `every` until `cancel` fires.
pub fn spawn_progress_reporter(
    stats: Arc<ConsumerStats>,
    cancel: CancellationToken,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = stats.snapshot();
                    info!(
                        messages = snapshot.messages,
                        errors = snapshot.errors,
                        rate = snapshot.rate,
                        "Progress report"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rate_guarded_for_zero_elapsed() {
        let snapshot = ProgressSnapshot::compute(10, 1, Duration::ZERO);
        assert_eq!(
            snapshot,
            ProgressSnapshot {
                messages: 10,
                errors: 1,
                rate: 0.0,
            }
        );
    }

    #[test]
    fn test_rate() {
        let snapshot = ProgressSnapshot::compute(30, 0, Duration::from_secs(2));
        assert_eq!(snapshot.rate, 15.0);

        let snapshot = ProgressSnapshot::compute(1, 0, Duration::from_millis(500));
        assert_eq!(snapshot.rate, 2.0);
    }

    #[test]
    fn test_counters() {
        let stats = ConsumerStats::new();
        stats.record_message();
        stats.record_message();
        stats.record_error();

        let snapshot = stats.snapshot();
        assert_eq!((snapshot.messages, snapshot.errors), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_cancel() {
        let stats = Arc::new(ConsumerStats::new());
        let cancel = CancellationToken::new();

        let handle = spawn_progress_reporter(stats, cancel.clone(), REPORT_INTERVAL);
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        handle.await.unwrap();
    }
}

//! Periodic background jobs.
//!
//! A `Job` does one unit of work per `tick` and reports per-item outcomes
//! instead of failing as a whole. `spawn` drives a job on a fixed interval
//! until the shutdown signal flips.

pub mod sweeper;

pub use sweeper::InactiveAccountSweeper;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub succeeded: usize,
    pub failed: Vec<ItemFailure>,
    /// The tick did not run because a previous one was still in flight.
    pub skipped: bool,
}

impl TickReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, item: impl Into<String>, reason: impl ToString) {
        self.failed.push(ItemFailure {
            item: item.into(),
            reason: reason.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    async fn tick(&self) -> TickReport;
}

/// Runs `job` every `period` on the tokio runtime. Ticks are awaited in
/// sequence, so one job never overlaps itself; missed ticks are dropped.
pub fn spawn(job: Arc<dyn Job>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = job.name(), period_secs = period.as_secs(), "Scheduled job started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = job.tick().await;
                    if report.skipped {
                        debug!(job = job.name(), "Tick skipped, previous run still active");
                    } else if report.is_clean() {
                        debug!(job = job.name(), succeeded = report.succeeded, "Tick finished");
                    } else {
                        warn!(
                            job = job.name(),
                            succeeded = report.succeeded,
                            failed = report.failed.len(),
                            "Tick finished with failures"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(job = job.name(), "Scheduled job stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn tick(&self) -> TickReport {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            TickReport {
                succeeded: 1,
                ..TickReport::default()
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_ticks_until_shutdown() {
        let job = Arc::new(CountingJob {
            ticks: AtomicUsize::new(0),
        });
        let (tx, rx) = watch::channel(false);
        let handle = spawn(job.clone(), Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let ticks = job.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), ticks);
    }

    #[test]
    fn test_report_helpers() {
        let mut report = TickReport::default();
        assert!(report.is_clean());
        report.record_failure("entry-1", "mail api down");
        assert!(!report.is_clean());
        assert_eq!(report.failed[0].item, "entry-1");
        assert!(TickReport::skipped().skipped);
    }
}

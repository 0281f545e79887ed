//! Liveness monitor — background task that re-checks backlogged devices.
//!
//! Every `interval` the monitor asks the tracker for a check cycle and
//! hands non-empty reports to the registered callback, which is how the
//! scheduler learns about dead and recovered hosting devices.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::tracker::{LivenessReport, LivenessTracker};

/// Callback invoked with the outcome of every cycle that found changes.
pub type LivenessCallback = Arc<dyn Fn(LivenessReport) -> BoxFuture + Send + Sync>;

pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

pub struct LivenessMonitor {
    tracker: Arc<LivenessTracker>,
    interval: Duration,
    on_report: Option<LivenessCallback>,
}

impl LivenessMonitor {
    pub fn new(tracker: Arc<LivenessTracker>, interval: Duration) -> Self {
        Self {
            tracker,
            interval,
            on_report: None,
        }
    }

    pub fn with_callback(mut self, callback: LivenessCallback) -> Self {
        self.on_report = Some(callback);
        self
    }

    pub fn tracker(&self) -> &Arc<LivenessTracker> {
        &self.tracker
    }

    /// Run one check cycle and deliver its report.
    pub async fn tick(&self) -> LivenessReport {
        let report = self.tracker.check_backlogged_hosting_devices().await;
        if report.is_empty() {
            return report;
        }
        info!(
            reachable = report.reachable.len(),
            dead = report.dead.len(),
            "liveness check found changes"
        );
        if let Some(callback) = &self.on_report {
            callback(report.clone()).await;
        }
        report
    }

    /// Loop until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "liveness monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("liveness monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}

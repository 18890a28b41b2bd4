//! Reconciliation loop: keeps one synchronizer per discovered stream.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::StreamDiscovery;
use crate::error::Result;
use crate::registry::StreamRegistry;
use crate::synchronizer::{StreamSynchronizer, SyncContext};

/// Changes applied by one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Streams whose synchronizer had exited unexpectedly and was started again.
    pub restarted: Vec<String>,
    pub tracked: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restarted.is_empty()
    }
}

pub struct Reconciler {
    discovery: Arc<dyn StreamDiscovery>,
    registry: Arc<StreamRegistry>,
    ctx: Arc<SyncContext>,
    interval: Duration,
    token: CancellationToken,
}

impl Reconciler {
    pub fn new(
        discovery: Arc<dyn StreamDiscovery>,
        registry: Arc<StreamRegistry>,
        ctx: Arc<SyncContext>,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            discovery,
            registry,
            ctx,
            interval,
            token,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// One reconciliation step. A discovery error leaves the tracked set untouched.
    pub async fn tick(&self) -> Result<ReconcileReport> {
        let streams = self.discovery.discover().await?;

        let crashed: HashSet<String> = self
            .registry
            .reap_exited()
            .into_iter()
            .map(|d| d.path)
            .collect();
        for path in &crashed {
            warn!(stream = %path, "Synchronizer exited unexpectedly");
        }

        let mut report = ReconcileReport::default();
        let mut seen = HashSet::with_capacity(streams.len());
        for descriptor in streams {
            if !seen.insert(descriptor.path.clone()) {
                continue;
            }
            let path = descriptor.path.clone();
            let started = self.registry.track(descriptor, &self.token, |assignment| {
                StreamSynchronizer::spawn(assignment, self.ctx.clone(), self.registry.clone())
            });
            if started.is_some() {
                if crashed.contains(&path) {
                    report.restarted.push(path);
                } else {
                    report.added.push(path);
                }
            }
        }

        let keep: HashSet<&str> = seen.iter().map(String::as_str).collect();
        report.removed = self
            .registry
            .retain_only(&keep)
            .into_iter()
            .map(|d| d.path)
            .collect();
        report.removed.sort();
        report.tracked = self.registry.len();
        Ok(report)
    }

    /// Ticks on a fixed interval until cancelled, then stops every synchronizer.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.is_noop() => {
                    debug!(tracked = report.tracked, "Stream set unchanged");
                }
                Ok(report) => {
                    for path in &report.added {
                        info!(stream = %path, "Mirroring new stream");
                    }
                    for path in &report.removed {
                        info!(stream = %path, "Stream ended, stopping mirror");
                    }
                    for path in &report.restarted {
                        info!(stream = %path, "Restarted mirror");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Discovery failed, keeping current streams");
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        let handles = self.registry.drain();
        info!(count = handles.len(), "Stopping synchronizers");
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Synchronizer task failed during shutdown");
            }
        }
    }
}

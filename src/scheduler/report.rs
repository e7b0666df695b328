//! Report manager for periodic window summaries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::monitor::TargetMonitor;
use crate::sink::{ReportSink, TargetReport};

/// Report one window of every target at a fixed cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPolicy {
    pub window: String,
    pub every: Duration,
}

impl ReportPolicy {
    pub fn new(window: impl Into<String>, every: Duration) -> Self {
        Self {
            window: window.into(),
            every,
        }
    }
}

/// Default report policies.
pub fn default_report_policies() -> Vec<ReportPolicy> {
    vec![
        ReportPolicy::new("medium", Duration::from_secs(10)), // 10 min window every 10s
        ReportPolicy::new("long", Duration::from_secs(60)),   // 1 h window every minute
    ]
}

/// Snapshot `window` for every target that has it.
pub fn collect_reports(monitors: &[Arc<TargetMonitor>], window: &str) -> Vec<TargetReport> {
    monitors
        .iter()
        .filter_map(|m| {
            m.window(window).map(|agg| TargetReport {
                url: m.url().to_string(),
                window: window.to_string(),
                snapshot: agg.snapshot(),
            })
        })
        .collect()
}

/// Manager pushing periodic reports to a sink.
pub struct ReportManager {
    monitors: Vec<Arc<TargetMonitor>>,
    policies: Vec<ReportPolicy>,
    stop: broadcast::Sender<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ReportManager {
    pub fn new(monitors: Vec<Arc<TargetMonitor>>, policies: Vec<ReportPolicy>) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            monitors,
            policies,
            stop,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start one background task per policy.
    pub fn start(&self, sink: Arc<dyn ReportSink>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        for policy in self.policies.iter().cloned() {
            let monitors = self.monitors.clone();
            let sink = sink.clone();
            let mut stop_rx = self.stop.subscribe();

            tasks.push(tokio::spawn(async move {
                // The first report covers one full period.
                let mut interval = tokio::time::interval_at(Instant::now() + policy.every, policy.every);

                loop {
                    tokio::select! {
                        biased;
                        _ = stop_rx.recv() => break,
                        _ = interval.tick() => {
                            let reports = collect_reports(&monitors, &policy.window);
                            tracing::debug!(
                                "ReportManager: {} reports for window {}",
                                reports.len(),
                                policy.window
                            );
                            for report in &reports {
                                sink.on_report(report);
                            }
                        }
                    }
                }
            }));
        }
    }

    /// Stop the report manager and wait for its tasks.
    pub async fn stop(&self) {
        let _ = self.stop.send(());

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("ReportManager: Task ended abnormally: {}", e);
            }
        }
    }
}

//! Scheduler module owning every target monitor.
//!
//! The registry is built once at startup; targets are not added or removed
//! while running.

mod report;

pub use report::*;

use crate::alert::Alert;
use crate::config::TargetParameter;
use crate::monitor::{MonitorError, MonitorHandle, MonitorSettings, TargetMonitor};
use crate::probe::Prober;
use crate::sink::{AlertLog, ReportSink};

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const ALERT_CHANNEL_SIZE: usize = 1000;

/// The main scheduler that runs one monitor per target.
pub struct Scheduler {
    monitors: Vec<Arc<TargetMonitor>>,
    handles: Mutex<Vec<MonitorHandle>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    alert_log: Arc<AlertLog>,
    report_manager: ReportManager,
}

impl Scheduler {
    /// Build a monitor for every target. Fails before anything starts if a
    /// target or window is misconfigured.
    pub fn new(
        targets: Vec<TargetParameter>,
        settings: &MonitorSettings,
        report_policies: Vec<ReportPolicy>,
    ) -> Result<Self, MonitorError> {
        for policy in &report_policies {
            if !settings.windows.iter().any(|w| w.name == policy.window) {
                return Err(MonitorError::UnknownWindow(policy.window.clone()));
            }
        }

        let mut seen = HashSet::new();
        let mut monitors = Vec::with_capacity(targets.len());
        for target in targets {
            if !seen.insert(target.url.clone()) {
                return Err(MonitorError::DuplicateTarget(target.url));
            }
            monitors.push(Arc::new(TargetMonitor::new(target, settings)?));
        }

        let report_manager = ReportManager::new(monitors.clone(), report_policies);

        Ok(Self {
            monitors,
            handles: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
            alert_log: Arc::new(AlertLog::default()),
            report_manager,
        })
    }

    pub fn monitors(&self) -> &[Arc<TargetMonitor>] {
        &self.monitors
    }

    pub fn alert_log(&self) -> Arc<AlertLog> {
        self.alert_log.clone()
    }

    /// Start monitoring all targets. Calling it twice has no effect.
    pub async fn start<P: Prober>(&self, prober: Arc<P>, sink: Arc<dyn ReportSink>) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        tracing::info!("Starting scheduler with {} targets", self.monitors.len());

        let (tx, rx) = mpsc::channel(ALERT_CHANNEL_SIZE);
        for monitor in &self.monitors {
            handles.push(monitor.clone().start(prober.clone(), tx.clone()));
        }
        drop(tx);

        *self.dispatcher.lock().await = Some(tokio::spawn(run_alert_dispatcher(
            rx,
            sink.clone(),
            self.alert_log.clone(),
        )));

        self.report_manager.start(sink);
    }

    /// Stop every monitor and flush alerts already raised.
    pub async fn stop(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.stop().await;
        }

        self.report_manager.stop().await;

        // All senders are gone now, so the dispatcher drains and exits.
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                tracing::error!("Alert dispatcher ended abnormally: {}", e);
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

/// Forward alerts from every monitor to the sink, in arrival order.
async fn run_alert_dispatcher(
    mut rx: mpsc::Receiver<Alert>,
    sink: Arc<dyn ReportSink>,
    alert_log: Arc<AlertLog>,
) {
    while let Some(alert) = rx.recv().await {
        sink.on_alert(&alert);
        alert_log.push(alert);
    }
}

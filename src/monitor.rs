//! Per-target monitoring.
//!
//! Each target owns one aggregator per configured window and runs two tasks:
//! a probe loop feeding every aggregator, and an alert loop evaluating the
//! alert window on its own timer. A hanging probe therefore never delays
//! alert evaluation of samples already collected.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::alert::{Alert, AlertEvaluator};
use crate::config::TargetParameter;
use crate::probe::{ProbeResult, Prober};
use crate::stats::{StatsError, WindowAggregator, WindowSnapshot};

/// Errors raised while building a monitor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("{url}: {source}")]
    Stats {
        url: String,
        #[source]
        source: StatsError,
    },
    #[error("window '{0}' is not one of the configured windows")]
    UnknownWindow(String),
    #[error("target {0} is listed more than once")]
    DuplicateTarget(String),
}

/// A named trailing window length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub name: String,
    pub duration: Duration,
}

impl WindowSpec {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

/// Settings shared by every target monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub windows: Vec<WindowSpec>,
    /// Name of the window the alert evaluator reads.
    pub alert_window: String,
    /// Alert evaluation cadence; the target's probe interval when `None`.
    pub alert_interval: Option<Duration>,
    /// Probes allowed in flight at once for one target.
    pub max_in_flight: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowSpec::new("short", Duration::from_secs(2 * 60)),
                WindowSpec::new("medium", Duration::from_secs(10 * 60)),
                WindowSpec::new("long", Duration::from_secs(60 * 60)),
            ],
            alert_window: "short".to_string(),
            alert_interval: None,
            max_in_flight: 5,
        }
    }
}

/// An aggregator together with the window it covers.
#[derive(Debug)]
pub struct TargetWindow {
    pub spec: WindowSpec,
    pub aggregator: WindowAggregator,
}

/// Monitoring state for one URL.
#[derive(Debug)]
pub struct TargetMonitor {
    url: String,
    probe_interval: Duration,
    alert_interval: Duration,
    max_in_flight: usize,
    windows: Vec<TargetWindow>,
    alert_window: usize,
}

impl TargetMonitor {
    pub fn new(param: TargetParameter, settings: &MonitorSettings) -> Result<Self, MonitorError> {
        let alert_window = settings
            .windows
            .iter()
            .position(|w| w.name == settings.alert_window)
            .ok_or_else(|| MonitorError::UnknownWindow(settings.alert_window.clone()))?;

        let windows = settings
            .windows
            .iter()
            .map(|spec| {
                let aggregator = WindowAggregator::new(spec.duration, param.probe_interval).map_err(
                    |source| MonitorError::Stats {
                        url: param.url.clone(),
                        source,
                    },
                )?;
                Ok(TargetWindow {
                    spec: spec.clone(),
                    aggregator,
                })
            })
            .collect::<Result<Vec<_>, MonitorError>>()?;

        Ok(Self {
            url: param.url,
            probe_interval: param.probe_interval,
            alert_interval: settings.alert_interval.unwrap_or(param.probe_interval),
            max_in_flight: settings.max_in_flight.max(1),
            windows,
            alert_window,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    pub fn windows(&self) -> &[TargetWindow] {
        &self.windows
    }

    /// Look up an aggregator by window name.
    pub fn window(&self, name: &str) -> Option<&WindowAggregator> {
        self.windows
            .iter()
            .find(|w| w.spec.name == name)
            .map(|w| &w.aggregator)
    }

    pub fn alert_aggregator(&self) -> &WindowAggregator {
        &self.windows[self.alert_window].aggregator
    }

    /// Feed one probe result to every window.
    pub fn record(&self, result: ProbeResult) {
        for window in &self.windows {
            window.aggregator.update(result);
        }
    }

    pub fn snapshots(&self) -> Vec<(String, WindowSnapshot)> {
        self.windows
            .iter()
            .map(|w| (w.spec.name.clone(), w.aggregator.snapshot()))
            .collect()
    }

    /// Start the probe and alert tasks. Alerts are sent on `alerts`.
    pub fn start<P: Prober>(self: Arc<Self>, prober: Arc<P>, alerts: mpsc::Sender<Alert>) -> MonitorHandle {
        let (stop_tx, _) = broadcast::channel(1);

        tracing::info!("Monitor: Starting {} every {:?}", self.url, self.probe_interval);

        let probe_task = tokio::spawn(run_probe_loop(self.clone(), prober, stop_tx.subscribe()));
        let alert_task = tokio::spawn(run_alert_loop(self.clone(), alerts, stop_tx.subscribe()));

        MonitorHandle {
            url: self.url.clone(),
            stop_tx,
            probe_task,
            alert_task,
        }
    }
}

/// Handle to a running monitor. Dropping it also stops the monitor.
pub struct MonitorHandle {
    url: String,
    stop_tx: broadcast::Sender<()>,
    probe_task: JoinHandle<()>,
    alert_task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop both tasks and wait for them to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());

        for task in [self.probe_task, self.alert_task] {
            if let Err(e) = task.await {
                tracing::error!("Monitor: Task for {} ended abnormally: {}", self.url, e);
            }
        }

        tracing::info!("Monitor: Stopped {}", self.url);
    }
}

async fn run_probe_loop<P: Prober>(
    monitor: Arc<TargetMonitor>,
    prober: Arc<P>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(monitor.max_in_flight));
    let mut in_flight = JoinSet::new();

    let mut interval = tokio::time::interval(monitor.probe_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Probe task for {} failed: {}", monitor.url, e);
                }
            }
            _ = interval.tick() => {
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!("Skipping probe for {} due to overlap limit", monitor.url);
                        continue;
                    }
                };

                let monitor = monitor.clone();
                let prober = prober.clone();

                in_flight.spawn(async move {
                    let _permit = permit;

                    let start = Instant::now();
                    let result = match prober.probe(&monitor.url).await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::warn!("Probe failed for {}: {}", monitor.url, e);
                            ProbeResult::unavailable(start.elapsed())
                        }
                    };

                    tracing::trace!(
                        url = %monitor.url,
                        status = result.status,
                        latency = ?result.latency,
                        "probe complete"
                    );
                    monitor.record(result);
                });
            }
        }
    }

    // Dropping the set aborts whatever is still in flight.
    drop(in_flight);
}

async fn run_alert_loop(
    monitor: Arc<TargetMonitor>,
    alerts: mpsc::Sender<Alert>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut evaluator = AlertEvaluator::new(monitor.url.clone());

    let mut interval = tokio::time::interval(monitor.alert_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let Some(alert) = evaluator.evaluate(monitor.alert_aggregator()) else {
                    continue;
                };

                tracing::debug!(
                    url = %alert.url,
                    availability = alert.availability,
                    direction = ?alert.direction,
                    "availability transition"
                );

                // A stop request wins over a pending hand-off.
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => {
                        break;
                    }
                    sent = alerts.send(alert) => {
                        if sent.is_err() {
                            tracing::error!("Alert channel closed, stopping alerts for {}", monitor.url);
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDirection;
    use crate::probe::ProbeError;

    const URL: &str = "http://localhost:8080";

    fn param(interval_ms: u64) -> TargetParameter {
        TargetParameter {
            url: URL.to_string(),
            probe_interval: Duration::from_millis(interval_ms),
        }
    }

    fn one_second_settings() -> MonitorSettings {
        MonitorSettings {
            windows: vec![
                WindowSpec::new("short", Duration::from_secs(1)),
                WindowSpec::new("long", Duration::from_secs(10)),
            ],
            alert_window: "short".to_string(),
            alert_interval: None,
            max_in_flight: 5,
        }
    }

    /// Answers 503 while the elapsed time falls inside `down`, 200 otherwise.
    struct FaultyEndpoint {
        start: Instant,
        down: std::ops::RangeInclusive<Duration>,
    }

    impl Prober for FaultyEndpoint {
        async fn probe(&self, _url: &str) -> Result<ProbeResult, ProbeError> {
            let since = self.start.elapsed();
            tokio::time::sleep(Duration::from_millis(10)).await;
            let status = if self.down.contains(&since) { 503 } else { 200 };
            Ok(ProbeResult::new(Duration::from_millis(10), status))
        }
    }

    struct Unreachable;

    impl Prober for Unreachable {
        async fn probe(&self, _url: &str) -> Result<ProbeResult, ProbeError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(ProbeError::Network("connection refused".to_string()))
        }
    }

    /// Answers 503 right away until `after` has passed, then never answers.
    struct HangsAfter {
        start: Instant,
        after: Duration,
    }

    impl Prober for HangsAfter {
        async fn probe(&self, _url: &str) -> Result<ProbeResult, ProbeError> {
            if self.start.elapsed() >= self.after {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ProbeResult::unavailable(Duration::from_millis(1)))
        }
    }

    #[test]
    fn test_new_rejects_window_shorter_than_interval() {
        let err = TargetMonitor::new(param(2000), &one_second_settings()).unwrap_err();
        assert!(matches!(err, MonitorError::Stats { ref url, .. } if url == URL));
    }

    #[test]
    fn test_new_rejects_unknown_alert_window() {
        let settings = MonitorSettings {
            alert_window: "medium".to_string(),
            ..one_second_settings()
        };
        let err = TargetMonitor::new(param(100), &settings).unwrap_err();
        assert_eq!(err, MonitorError::UnknownWindow("medium".to_string()));
    }

    #[test]
    fn test_default_settings_build_three_windows() {
        let monitor = TargetMonitor::new(param(1000), &MonitorSettings::default()).unwrap();
        let capacities: Vec<usize> = monitor.windows().iter().map(|w| w.aggregator.capacity()).collect();
        assert_eq!(capacities, vec![120, 600, 3600]);
        assert_eq!(monitor.alert_aggregator().window(), Duration::from_secs(120));
    }

    #[test]
    fn test_record_feeds_every_window() {
        let monitor = TargetMonitor::new(param(100), &one_second_settings()).unwrap();
        for _ in 0..15 {
            monitor.record(ProbeResult::new(Duration::from_millis(4), 200));
        }

        assert_eq!(monitor.window("short").unwrap().count(), 10);
        assert_eq!(monitor.window("long").unwrap().count(), 15);
        assert!(monitor.window("medium").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_then_recovered_at_crossing_times() {
        let start = Instant::now();
        let prober = Arc::new(FaultyEndpoint {
            start,
            down: Duration::from_secs(2)..=Duration::from_secs(4),
        });
        let monitor = Arc::new(TargetMonitor::new(param(100), &one_second_settings()).unwrap());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = monitor.clone().start(prober, tx);

        let down = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no down alert")
            .unwrap();
        let at = start.elapsed();
        assert_eq!(down.direction, AlertDirection::Down);
        assert!(down.availability < 80.0);
        assert!(at > Duration::from_millis(2200) && at < Duration::from_secs(3), "down at {:?}", at);

        let recovered = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no recovery alert")
            .unwrap();
        let at = start.elapsed();
        assert_eq!(recovered.direction, AlertDirection::Recovered);
        assert!(recovered.availability >= 80.0);
        assert!(at > Duration::from_millis(4200) && at < Duration::from_millis(5500), "recovered at {:?}", at);

        // Healthy from here on, nothing more to report
        assert!(tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.is_err());

        handle.stop().await;
        assert_eq!(monitor.window("short").unwrap().availability(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_become_unavailable_samples() {
        let monitor = Arc::new(TargetMonitor::new(param(100), &one_second_settings()).unwrap());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = monitor.clone().start(Arc::new(Unreachable), tx);

        let alert = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no alert")
            .unwrap();
        assert!(alert.is_down());
        assert_eq!(alert.availability, 0.0);

        handle.stop().await;

        let short = monitor.window("short").unwrap();
        assert!(short.count() > 0);
        assert_eq!(short.status_counts().get(&503), Some(&short.count()));
        assert!(short.max_latency() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probes_do_not_block_alerts() {
        let start = Instant::now();
        let prober = Arc::new(HangsAfter {
            start,
            after: Duration::from_millis(500),
        });
        let monitor = Arc::new(TargetMonitor::new(param(100), &one_second_settings()).unwrap());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = monitor.clone().start(prober, tx);

        let alert = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("alert loop blocked")
            .unwrap();
        assert!(alert.is_down());
        assert!(start.elapsed() < Duration::from_millis(1200));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_alerts_after_stop() {
        let monitor = Arc::new(TargetMonitor::new(param(100), &one_second_settings()).unwrap());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = monitor.clone().start(Arc::new(Unreachable), tx);

        // Still warming up when stopped
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.stop().await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_alert_interval() {
        let settings = MonitorSettings {
            alert_interval: Some(Duration::from_millis(250)),
            ..one_second_settings()
        };
        let monitor = Arc::new(TargetMonitor::new(param(100), &settings).unwrap());
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();
        let handle = monitor.clone().start(Arc::new(Unreachable), tx);

        let alert = rx.recv().await.unwrap();
        assert!(alert.is_down());
        // First alert tick at or after the one second warm-up
        let at = start.elapsed();
        assert!(at >= Duration::from_secs(1) && at < Duration::from_millis(1250), "alert at {:?}", at);

        handle.stop().await;
    }
}

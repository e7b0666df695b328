//! Consumers of alerts and periodic window reports.

use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::alert::Alert;
use crate::stats::WindowSnapshot;

/// Statistics of one target window, handed to sinks on a fixed cadence.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub url: String,
    pub window: String,
    #[serde(flatten)]
    pub snapshot: WindowSnapshot,
}

/// Anything that wants alerts and reports.
pub trait ReportSink: Send + Sync + 'static {
    fn on_alert(&self, alert: &Alert);
    fn on_report(&self, report: &TargetReport);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Writes alerts and reports through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    format: OutputFormat,
}

impl LogSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn render_alert(&self, alert: &Alert) -> String {
        match self.format {
            OutputFormat::Text => alert.message(),
            OutputFormat::Json => to_json(alert),
        }
    }

    pub fn render_report(&self, report: &TargetReport) -> String {
        match self.format {
            OutputFormat::Text => {
                let snap = &report.snapshot;
                format!(
                    "{} {:<30} : avg {:<7} max {:<7} avail {:.0}%",
                    window_label(snap.window),
                    domain(&report.url),
                    format_latency(snap.avg_latency),
                    format_latency(snap.max_latency),
                    snap.availability
                )
            }
            OutputFormat::Json => to_json(report),
        }
    }
}

impl ReportSink for LogSink {
    fn on_alert(&self, alert: &Alert) {
        let line = self.render_alert(alert);
        if alert.is_down() {
            tracing::warn!(target: "sitewatch::alerts", "{}", line);
        } else {
            tracing::info!(target: "sitewatch::alerts", "{}", line);
        }
    }

    fn on_report(&self, report: &TargetReport) {
        tracing::info!(target: "sitewatch::reports", "{}", self.render_report(report));
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

/// Bounded history of the most recent alerts.
#[derive(Debug)]
pub struct AlertLog {
    capacity: usize,
    alerts: Mutex<VecDeque<Alert>>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            alerts: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, alert: Alert) {
        let mut alerts = self.alerts.lock();
        if alerts.len() == self.capacity {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    /// Alerts oldest first.
    pub fn recent(&self) -> Vec<Alert> {
        self.alerts.lock().iter().cloned().collect()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Round to milliseconds, keeping nanosecond precision for sub-microsecond values.
pub fn format_latency(d: Duration) -> String {
    if d < Duration::from_micros(1) {
        return format!("{:?}", d);
    }
    let ms = (d.as_nanos() + 500_000) / 1_000_000;
    format!("{:?}", Duration::from_millis(ms as u64))
}

fn window_label(window: Duration) -> String {
    let secs = window.as_secs();
    match secs {
        3600 => "last hour".to_string(),
        s if s % 3600 == 0 => format!("last {} hours", s / 3600),
        s if s % 60 == 0 => format!("last {} min", s / 60),
        s => format!("last {} s", s),
    }
}

fn domain(url: &str) -> &str {
    url.split_once("//").map(|(_, rest)| rest).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDirection;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn report(window_secs: u64) -> TargetReport {
        TargetReport {
            url: "https://example.com".to_string(),
            window: "medium".to_string(),
            snapshot: WindowSnapshot {
                window: Duration::from_secs(window_secs),
                capacity: 600,
                count: 4,
                availability: 75.0,
                avg_latency: Duration::from_micros(12_345),
                max_latency: Duration::from_millis(40),
                status_counts: BTreeMap::from([(200, 3), (503, 1)]),
            },
        }
    }

    fn alert(direction: AlertDirection) -> Alert {
        Alert {
            url: "https://example.com".to_string(),
            availability: 42.0,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
            direction,
        }
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(Duration::from_nanos(250)), "250ns");
        assert_eq!(format_latency(Duration::from_micros(12_345)), "12ms");
        assert_eq!(format_latency(Duration::from_micros(12_500)), "13ms");
        assert_eq!(format_latency(Duration::from_millis(1_234)), "1.234s");
        assert_eq!(format_latency(Duration::ZERO), "0ns");
    }

    #[test]
    fn test_window_label() {
        assert_eq!(window_label(Duration::from_secs(600)), "last 10 min");
        assert_eq!(window_label(Duration::from_secs(3600)), "last hour");
        assert_eq!(window_label(Duration::from_secs(7200)), "last 2 hours");
        assert_eq!(window_label(Duration::from_secs(30)), "last 30 s");
    }

    #[test]
    fn test_render_report_text() {
        let line = LogSink::new(OutputFormat::Text).render_report(&report(600));
        assert_eq!(
            line,
            format!("last 10 min {:<30} : avg {:<7} max {:<7} avail 75%", "example.com", "12ms", "40ms")
        );
    }

    #[test]
    fn test_render_report_json() {
        let line = LogSink::new(OutputFormat::Json).render_report(&report(3600));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["url"], "https://example.com");
        assert_eq!(value["window"], "medium");
        assert_eq!(value["count"], 4);
        assert_eq!(value["max_latency_ms"], 40.0);
    }

    #[test]
    fn test_render_alert() {
        let text = LogSink::new(OutputFormat::Text).render_alert(&alert(AlertDirection::Down));
        assert_eq!(
            text,
            "Website https://example.com is down. availability=42%, time=2024-05-06 07:08:09"
        );

        let json = LogSink::new(OutputFormat::Json).render_alert(&alert(AlertDirection::Recovered));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["direction"], "recovered");
        assert_eq!(value["availability"], 42.0);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_alert_log_keeps_most_recent() {
        let log = AlertLog::new(2);
        log.push(alert(AlertDirection::Down));
        log.push(alert(AlertDirection::Recovered));
        log.push(alert(AlertDirection::Down));

        let directions: Vec<_> = log.recent().into_iter().map(|a| a.direction).collect();
        assert_eq!(directions, vec![AlertDirection::Recovered, AlertDirection::Down]);
    }
}

/// Sink that keeps everything it receives, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub alerts: Mutex<Vec<Alert>>,
    pub reports: Mutex<Vec<TargetReport>>,
}

#[cfg(test)]
impl ReportSink for RecordingSink {
    fn on_alert(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }

    fn on_report(&self, report: &TargetReport) {
        self.reports.lock().push(report.clone());
    }
}

//! Ring-buffer window aggregator.
//!
//! Keeps the most recent `capacity` probe results for one target and window
//! length, along with running sums so every read is O(1). The only linear
//! path is recomputing the maximum latency after the sample holding it is
//! evicted.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::time::Instant;

use crate::probe::ProbeResult;

/// Errors raised while building an aggregator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("window of {window:?} holds no samples at a probe interval of {interval:?}")]
    ZeroCapacity { window: Duration, interval: Duration },
}

/// Point-in-time copy of an aggregator's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    #[serde(rename = "window_ms", serialize_with = "as_millis")]
    pub window: Duration,
    pub capacity: usize,
    pub count: usize,
    pub availability: f64,
    #[serde(rename = "avg_latency_ms", serialize_with = "as_millis")]
    pub avg_latency: Duration,
    #[serde(rename = "max_latency_ms", serialize_with = "as_millis")]
    pub max_latency: Duration,
    pub status_counts: BTreeMap<u16, usize>,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

#[derive(Debug, Default)]
struct WindowState {
    samples: VecDeque<ProbeResult>,
    available: usize,
    latency_sum: Duration,
    max_latency: Duration,
    status_counts: BTreeMap<u16, usize>,
}

impl WindowState {
    fn evict_oldest(&mut self) {
        let Some(evicted) = self.samples.pop_front() else {
            return;
        };

        self.latency_sum -= evicted.latency;
        if let Some(n) = self.status_counts.get_mut(&evicted.status) {
            *n -= 1;
            if *n == 0 {
                self.status_counts.remove(&evicted.status);
            }
        }
        if evicted.is_available() {
            self.available -= 1;
        }

        if evicted.latency == self.max_latency {
            self.max_latency = self
                .samples
                .iter()
                .map(|s| s.latency)
                .max()
                .unwrap_or(Duration::ZERO);
        }
    }

    fn push(&mut self, result: ProbeResult) {
        self.latency_sum += result.latency;
        *self.status_counts.entry(result.status).or_insert(0) += 1;
        if result.is_available() {
            self.available += 1;
        }
        self.max_latency = self.max_latency.max(result.latency);
        self.samples.push_back(result);
    }

    fn availability(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        100.0 * self.available as f64 / self.samples.len() as f64
    }

    fn avg_latency(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let nanos = self.latency_sum.as_nanos() / self.samples.len() as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// Statistics for one (target, window length) pair.
///
/// Written by the owning monitor's probe loop and read by the alert evaluator
/// and reporters. Every field sits behind the same lock, so readers never see
/// a count that disagrees with the sums.
#[derive(Debug)]
pub struct WindowAggregator {
    window: Duration,
    capacity: usize,
    created_at: Instant,
    state: RwLock<WindowState>,
}

impl WindowAggregator {
    /// Build an aggregator holding `window / probe_interval` samples.
    pub fn new(window: Duration, probe_interval: Duration) -> Result<Self, StatsError> {
        let capacity = if probe_interval.is_zero() {
            0
        } else {
            (window.as_nanos() / probe_interval.as_nanos()) as usize
        };

        if capacity == 0 {
            return Err(StatsError::ZeroCapacity {
                window,
                interval: probe_interval,
            });
        }

        Ok(Self {
            window,
            capacity,
            created_at: Instant::now(),
            state: RwLock::new(WindowState {
                samples: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
        })
    }

    /// Record a probe result, evicting the oldest one once the window is full.
    pub fn update(&self, result: ProbeResult) {
        let mut state = self.state.write();
        if state.samples.len() == self.capacity {
            state.evict_oldest();
        }
        state.push(result);
    }

    /// Percentage of held samples that were not unavailable, 0 when empty.
    pub fn availability(&self) -> f64 {
        self.state.read().availability()
    }

    pub fn avg_latency(&self) -> Duration {
        self.state.read().avg_latency()
    }

    pub fn max_latency(&self) -> Duration {
        self.state.read().max_latency
    }

    pub fn count(&self) -> usize {
        self.state.read().samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time since construction. Eviction does not reset it.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn status_counts(&self) -> BTreeMap<u16, usize> {
        self.state.read().status_counts.clone()
    }

    /// Read every statistic under a single lock acquisition.
    pub fn snapshot(&self) -> WindowSnapshot {
        let state = self.state.read();
        WindowSnapshot {
            window: self.window,
            capacity: self.capacity,
            count: state.samples.len(),
            availability: state.availability(),
            avg_latency: state.avg_latency(),
            max_latency: state.max_latency,
            status_counts: state.status_counts.clone(),
        }
    }
}

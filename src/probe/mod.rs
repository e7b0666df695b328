//! Probe module for endpoint monitoring.
//!
//! A probe issues one request to a target and reports how long the first
//! byte took and which status code came back.

mod http;

pub use http::*;

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Status code treated as "down" when computing availability.
///
/// Every other code, including other 4xx/5xx responses, counts as available.
pub const UNAVAILABLE_STATUS: u16 = 503;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Time to first response byte.
    pub latency: Duration,
    pub status: u16,
}

impl ProbeResult {
    pub fn new(latency: Duration, status: u16) -> Self {
        Self { latency, status }
    }

    /// A sample standing in for a probe that never got a response.
    pub fn unavailable(latency: Duration) -> Self {
        Self::new(latency, UNAVAILABLE_STATUS)
    }

    pub fn is_available(&self) -> bool {
        self.status != UNAVAILABLE_STATUS
    }
}

/// Anything able to check a URL.
///
/// Ordinary network failures must come back as `ProbeError`, never as a panic.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, url: &str) -> impl Future<Output = Result<ProbeResult, ProbeError>> + Send;
}

//! HTTP probe implementation.

use std::time::{Duration, Instant};

use super::{ProbeError, ProbeResult, Prober};

/// Probes targets with a plain GET, sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        // Redirects are recorded as their own status rather than followed.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> Result<ProbeResult, ProbeError> {
        run_http_probe(&self.client, url, self.timeout).await
    }
}

/// Run an HTTP probe against the given address.
///
/// Latency is measured up to the arrival of the response head; the body is
/// never read.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let start = Instant::now();

    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    Ok(ProbeResult::new(start.elapsed(), response.status().as_u16()))
}

//! Configuration module for sitewatch.
//!
//! Server settings come from environment variables with sensible defaults;
//! the monitored targets come from a plain text file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::sink::OutputFormat;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} line {line}: expected 2 words, found {found}")]
    FieldCount { path: String, line: usize, found: usize },
    #[error("{path} line {line}: invalid url '{value}'")]
    InvalidUrl { path: String, line: usize, value: String },
    #[error("{path} line {line}: interval '{value}' is not a positive number of milliseconds")]
    InvalidInterval { path: String, line: usize, value: String },
    #[error("{0} lists no targets")]
    Empty(String),
}

/// One monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetParameter {
    pub url: String,
    pub probe_interval: Duration,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Target list file (default: "websites.txt")
    pub targets_file: PathBuf,
    /// HTTP port for the status API, 0 disables it (default: 8080)
    pub http_port: u16,
    /// Timeout applied to every probe (default: 5s)
    pub probe_timeout: Duration,
    /// Format of alert and report lines (default: text)
    pub output: OutputFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            targets_file: PathBuf::from("websites.txt"),
            http_port: 8080,
            probe_timeout: Duration::from_secs(5),
            output: OutputFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_TARGETS_FILE`: target list path (default: "websites.txt")
    /// - `SITEWATCH_HTTP_PORT`: status API port, 0 disables it (default: 8080)
    /// - `SITEWATCH_PROBE_TIMEOUT_MS`: probe timeout in ms (default: 5000)
    /// - `SITEWATCH_OUTPUT`: "text" or "json" (default: "text")
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(path) = lookup("SITEWATCH_TARGETS_FILE") {
            cfg.targets_file = PathBuf::from(path);
        }

        if let Some(port_str) = lookup("SITEWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Some(timeout_str) = lookup("SITEWATCH_PROBE_TIMEOUT_MS") {
            match timeout_str.parse::<u64>() {
                Ok(ms) if ms > 0 => cfg.probe_timeout = Duration::from_millis(ms),
                _ => tracing::warn!("Ignoring invalid SITEWATCH_PROBE_TIMEOUT_MS '{}'", timeout_str),
            }
        }

        if let Some(output) = lookup("SITEWATCH_OUTPUT") {
            match output.parse() {
                Ok(format) => cfg.output = format,
                Err(e) => tracing::warn!("Ignoring SITEWATCH_OUTPUT: {}", e),
            }
        }

        cfg
    }
}

/// Read the target list.
///
/// Each line holds a url and a probe interval in milliseconds:
///
/// ```text
/// http://example.com 1000
/// https://example.org/health 250
/// ```
///
/// Blank lines and lines starting with `#` are skipped.
pub fn load_targets(path: &Path) -> Result<Vec<TargetParameter>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    tracing::info!("Reading targets from {}", path.display());
    let targets = parse_targets(path, &content)?;
    if targets.is_empty() {
        return Err(ConfigError::Empty(path.display().to_string()));
    }

    Ok(targets)
}

fn parse_targets(path: &Path, content: &str) -> Result<Vec<TargetParameter>, ConfigError> {
    let mut targets = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(ConfigError::FieldCount {
                path: path.display().to_string(),
                line: i + 1,
                found: fields.len(),
            });
        }

        match Url::parse(fields[0]) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => {
                return Err(ConfigError::InvalidUrl {
                    path: path.display().to_string(),
                    line: i + 1,
                    value: fields[0].to_string(),
                })
            }
        };

        let interval_ms = match fields[1].parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => {
                return Err(ConfigError::InvalidInterval {
                    path: path.display().to_string(),
                    line: i + 1,
                    value: fields[1].to_string(),
                })
            }
        };

        targets.push(TargetParameter {
            url: fields[0].to_string(),
            probe_interval: Duration::from_millis(interval_ms),
        });
    }

    Ok(targets)
}

//! Availability alerts with hysteresis.
//!
//! A target goes down when its alert window drops below the threshold and
//! recovers once it is back at or above it. One alert is raised per
//! transition; nothing is raised while the window is younger than its own
//! length.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stats::WindowAggregator;

/// Availability percentage under which a target counts as down.
pub const AVAILABILITY_THRESHOLD: f64 = 80.0;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    Down,
    Recovered,
}

/// A detected availability transition for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub url: String,
    pub availability: f64,
    pub timestamp: DateTime<Utc>,
    pub direction: AlertDirection,
}

impl Alert {
    pub fn is_down(&self) -> bool {
        self.direction == AlertDirection::Down
    }

    /// One-line human readable description.
    pub fn message(&self) -> String {
        let what = match self.direction {
            AlertDirection::Down => "is down",
            AlertDirection::Recovered => "recovered",
        };
        format!(
            "Website {} {}. availability={:.0}%, time={}",
            self.url,
            what,
            self.availability,
            self.timestamp.format(DATE_FORMAT)
        )
    }
}

/// Decide the next down state for a target from its alert window.
///
/// Returns the new state and, when it differs from `down`, the alert
/// describing the transition.
pub fn evaluate(url: &str, aggregator: &WindowAggregator, down: bool) -> (bool, Option<Alert>) {
    if aggregator.age() < aggregator.window() {
        return (down, None);
    }

    let availability = aggregator.availability();
    let direction = if availability < AVAILABILITY_THRESHOLD && !down {
        AlertDirection::Down
    } else if availability >= AVAILABILITY_THRESHOLD && down {
        AlertDirection::Recovered
    } else {
        return (down, None);
    };

    let alert = Alert {
        url: url.to_string(),
        availability,
        timestamp: Utc::now(),
        direction,
    };
    (direction == AlertDirection::Down, Some(alert))
}

/// Holds the down state of a single target between evaluations.
#[derive(Debug)]
pub struct AlertEvaluator {
    url: String,
    down: bool,
}

impl AlertEvaluator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            down: false,
        }
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    pub fn evaluate(&mut self, aggregator: &WindowAggregator) -> Option<Alert> {
        let (down, alert) = evaluate(&self.url, aggregator, self.down);
        self.down = down;
        alert
    }
}

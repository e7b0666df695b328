//! HTTP request handlers.

use super::AppState;
use crate::alert::Alert;
use crate::stats::WindowSnapshot;

use axum::{extract::State, response::Json};
use serde::Serialize;

pub async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================================
// API: Targets
// ============================================================================

#[derive(Debug, Serialize)]
pub struct WindowStatus {
    pub name: String,
    #[serde(flatten)]
    pub snapshot: WindowSnapshot,
}

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub url: String,
    pub probe_interval_ms: u64,
    pub windows: Vec<WindowStatus>,
}

pub async fn handle_get_targets(State(state): State<AppState>) -> Json<Vec<TargetStatus>> {
    let targets = state
        .scheduler
        .monitors()
        .iter()
        .map(|m| TargetStatus {
            url: m.url().to_string(),
            probe_interval_ms: m.probe_interval().as_millis() as u64,
            windows: m
                .snapshots()
                .into_iter()
                .map(|(name, snapshot)| WindowStatus { name, snapshot })
                .collect(),
        })
        .collect();

    Json(targets)
}

// ============================================================================
// API: Alerts
// ============================================================================

pub async fn handle_get_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.scheduler.alert_log().recent())
}

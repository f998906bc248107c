//! Stage poller API handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use ezbids_core::{ActiveStage, SessionStatus};
use tracing::warn;

use crate::state::AppState;

/// Poller status response
#[derive(Debug, Serialize)]
pub struct PollerStatusResponse {
    /// Whether a poller is configured in this process
    pub available: bool,
    /// Whether the stage loops are running
    pub running: bool,
    /// Handlers running in this process
    pub active_handlers: usize,
    /// Configured handler limit (0 = unlimited)
    pub max_concurrent_handlers: usize,
    /// Session counts by status
    pub sessions_by_status: BTreeMap<String, i64>,
    /// Stages running in this process, oldest first
    pub active: Vec<ActiveStage>,
}

/// Get poller status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<PollerStatusResponse> {
    match state.poller() {
        Some(poller) => {
            let status = poller.status().await;
            Json(PollerStatusResponse {
                available: true,
                running: status.running,
                active_handlers: status.active_handlers,
                max_concurrent_handlers: status.max_concurrent_handlers,
                sessions_by_status: status.sessions_by_status,
                active: poller.active_stages().await,
            })
        }
        None => {
            let sessions_by_status = SessionStatus::ALL
                .iter()
                .filter_map(|status| match state.store().count_by_status(*status) {
                    Ok(count) => Some((status.as_str().to_string(), count)),
                    Err(e) => {
                        warn!("Failed to count {} sessions: {}", status, e);
                        None
                    }
                })
                .collect();
            Json(PollerStatusResponse {
                available: false,
                running: false,
                active_handlers: 0,
                max_concurrent_handlers: state.config().poller.max_concurrent_handlers,
                sessions_by_status,
                active: Vec::new(),
            })
        }
    }
}

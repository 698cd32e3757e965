//! Read-only views of the registry.

use axum::{extract::State, Json};
use beacon_core::{CoordinatorStats, Snapshot};

use crate::state::AppState;

/// Current snapshot of all reported users.
pub async fn list_users(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.coordinator.snapshot())
}

/// Connection and delivery counters.
pub async fn get_stats(State(state): State<AppState>) -> Json<CoordinatorStats> {
    Json(state.coordinator.stats())
}

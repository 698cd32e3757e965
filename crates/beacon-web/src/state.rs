//! Application state.

use beacon_core::{BroadcastCoordinator, Registry};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ServerConfig, MAX_PING_INTERVAL, MIN_PING_INTERVAL};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BroadcastCoordinator>,
    /// Outbound queue depth for each new WebSocket client.
    pub client_buffer: usize,
    pub ping_interval: Duration,
}

impl AppState {
    /// Build a fresh registry and coordinator for one server run.
    pub fn new(config: &ServerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let coordinator = BroadcastCoordinator::new(registry)
            .with_max_dropped_frames(config.max_dropped_frames);
        Self {
            coordinator: Arc::new(coordinator),
            client_buffer: config.client_buffer,
            ping_interval: config
                .ping_interval
                .clamp(MIN_PING_INTERVAL, MAX_PING_INTERVAL),
        }
    }
}

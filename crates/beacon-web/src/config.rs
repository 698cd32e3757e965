//! Server configuration.

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Default listen port, overridable through `PORT`.
pub const DEFAULT_PORT: u16 = 3000;

/// Default outbound queue depth per client.
pub const DEFAULT_CLIENT_BUFFER: usize = 32;

/// Bounds applied to the WebSocket ping cadence.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);
pub const MAX_PING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. `*` allows any origin.
    pub allowed_origins: Vec<String>,
    pub client_buffer: usize,
    pub max_dropped_frames: u64,
    /// Evict clients whose last report is older than this.
    pub stale_after: Option<Duration>,
    pub sweep_interval: Duration,
    /// Ping cadence; a client silent for two intervals is dropped.
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            allowed_origins: vec!["*".to_string()],
            client_buffer: DEFAULT_CLIENT_BUFFER,
            max_dropped_frames: beacon_core::broadcast::DEFAULT_MAX_DROPPED_FRAMES,
            stale_after: None,
            sweep_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the CORS layer for the configured origins.
    pub fn cors_layer(&self) -> Result<CorsLayer> {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);

        if self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*") {
            return Ok(layer.allow_origin(Any));
        }

        let origins = self
            .allowed_origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o).with_context(|| format!("invalid allowed origin: {o}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(layer.allow_origin(AllowOrigin::list(origins)))
    }
}

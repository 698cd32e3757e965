//! Location server command.

use anyhow::Result;
use beacon_web::config::{DEFAULT_CLIENT_BUFFER, DEFAULT_PORT};
use beacon_web::ServerConfig;
use clap::Args;
use colored::Colorize;
use std::time::Duration;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Host to bind to
    #[arg(long, env = "BEACON_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Comma-separated CORS origins, `*` for any
    #[arg(long, env = "BEACON_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Outbound frames buffered per client before dropping
    #[arg(long, env = "BEACON_CLIENT_BUFFER", default_value_t = DEFAULT_CLIENT_BUFFER)]
    pub client_buffer: usize,

    /// Dropped frames after which a slow client is disconnected
    #[arg(long, env = "BEACON_MAX_DROPPED_FRAMES", default_value_t = 100)]
    pub max_dropped_frames: u64,

    /// Disconnect clients that have not reported for this many seconds
    #[arg(long, env = "BEACON_STALE_AFTER_SECS")]
    pub stale_after_secs: Option<u64>,

    /// Seconds between WebSocket pings
    #[arg(long, env = "BEACON_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,
}

impl ServeArgs {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            allowed_origins: self
                .allowed_origins
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            client_buffer: self.client_buffer,
            max_dropped_frames: self.max_dropped_frames,
            stale_after: self.stale_after_secs.map(Duration::from_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            ..ServerConfig::default()
        }
    }
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = args.into_config();

    println!();
    println!("  {} {}", "Beacon".cyan().bold(), "Location Server".bold());
    println!();
    println!("  {}     http://{}:{}", "Status".green(), config.host, config.port);
    println!("  {}      http://{}:{}/api/users", "Users".green(), config.host, config.port);
    println!("  {}  ws://{}:{}/ws", "WebSocket".green(), config.host, config.port);
    if let Some(stale_after) = config.stale_after {
        println!(
            "  {}  {}s",
            "Stale after".green(),
            stale_after.as_secs()
        );
    }
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    beacon_web::run_server(config).await?;

    Ok(())
}

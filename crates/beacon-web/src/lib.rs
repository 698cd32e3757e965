//! Beacon Web Server
//!
//! Axum-based WebSocket transport and read-only HTTP API for the location
//! broadcast service.

pub mod config;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod websocket;

use anyhow::Result;
use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use config::ServerConfig;
use state::AppState;

/// Create the application router.
pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    let api_routes = Router::new()
        .route("/users", get(routes::users::list_users))
        .route("/stats", get(routes::users::get_stats))
        .with_state(state.clone());

    Router::new()
        .route("/", get(routes::status::index))
        .nest("/api", api_routes)
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the web server until Ctrl+C.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    serve(listener, config, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// The registry lives exactly as long as this call.
pub async fn serve<F>(listener: TcpListener, config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::new(&config);
    let app = create_router(state.clone(), config.cors_layer()?);

    let sweeper = config.stale_after.map(|stale_after| {
        sweeper::spawn_stale_sweeper(
            Arc::clone(&state.coordinator),
            stale_after,
            config.sweep_interval,
        )
    });

    let addr = listener.local_addr()?;
    info!("Location server listening on http://{}", addr);

    let coordinator = Arc::clone(&state.coordinator);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = coordinator.evict_all();
        })
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("Location server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! HTTP plumbing shared by both services
//!
//! Error mapping, the per-request resource middleware, logging setup and the
//! serve loop.

pub mod error;
pub mod middleware;

use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub use error::{Result, ServiceError};

/// Install the global tracing subscriber (`RUST_LOG` overrides the `info` default)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Layers every service gets: request spans and resource accounting
pub fn with_common_layers(router: Router) -> Router {
    router
        .layer(axum::middleware::from_fn(middleware::release_resources))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until Ctrl-C, exposing peer addresses to handlers
pub async fn serve(router: Router, bind: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

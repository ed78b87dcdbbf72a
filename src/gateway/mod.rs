//! Gateway service
//!
//! Forwards `/chat` prompts to the local generation daemon, with a per-client
//! request ceiling. Optionally prefetches a model asset into the local cache
//! on startup; the chat path never reads it.

pub mod client;
pub mod handlers;
pub mod rate_limit;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;

use crate::server;
use crate::storage::huggingface::ModelStore;
use crate::types::config::GatewayConfig;
use client::DaemonClient;
use rate_limit::RateLimiter;

pub fn build_router(client: DaemonClient, limiter: Arc<RateLimiter>) -> Router {
    let chat = post(handlers::chat_handler).route_layer(axum::middleware::from_fn_with_state(
        limiter,
        rate_limit::limit_by_ip,
    ));

    let router = Router::new()
        .route("/chat", chat)
        .route("/health", get(handlers::health_handler))
        .with_state(client);

    server::with_common_layers(router)
}

/// Fetch `model_id` into the cache in the background if it is not there yet.
/// Failures are logged and otherwise ignored.
pub fn spawn_prefetch(store: ModelStore, model_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if store.is_cached(&model_id) {
            tracing::debug!("Prefetch skipped, {} is already cached", model_id);
            return;
        }

        tracing::info!("Prefetching {} into {:?}", model_id, store.models_dir());
        match store.ensure_model(&model_id).await {
            Ok(path) => tracing::info!("Prefetched {} to {:?}", model_id, path),
            Err(e) => tracing::warn!("Prefetch of {} failed: {}", model_id, e),
        }
    })
}

fn spawn_prune_task(limiter: Arc<RateLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(rate_limit::WINDOW);
        loop {
            ticker.tick().await;
            limiter.prune(Instant::now());
        }
    })
}

pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    tracing::info!(
        "Gateway forwarding to {} (model {}), {} requests/minute per client",
        config.daemon_url,
        config.daemon_model,
        config.rate_limit_per_minute
    );

    let client = DaemonClient::new(
        &config.daemon_url,
        config.daemon_model.clone(),
        config.daemon_timeout,
    )?;
    let limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute));
    spawn_prune_task(limiter.clone());

    if let Some(model_id) = &config.prefetch_model {
        spawn_prefetch(ModelStore::new(&config.models_dir)?, model_id.clone());
    }

    server::serve(build_router(client, limiter), config.bind).await?;
    Ok(())
}

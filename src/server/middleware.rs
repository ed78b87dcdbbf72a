use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Level;

use crate::system::resources;

/// Runs after every request, whatever its outcome.
///
/// Request-scoped buffers are released when the handler's values drop, so all
/// that is left to do here is account for what the process still holds.
pub async fn release_resources(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    if !tracing::enabled!(Level::DEBUG) {
        return response;
    }

    // Sampling may shell out to `ps`
    let rss_mb = tokio::task::spawn_blocking(resources::process_memory_mb)
        .await
        .ok()
        .flatten();
    match rss_mb {
        Some(rss_mb) => tracing::debug!(
            "{} {} -> {} (resident memory {} MB)",
            method,
            path,
            response.status(),
            rss_mb
        ),
        None => tracing::debug!("{} {} -> {}", method, path, response.status()),
    }

    response
}

use axum::extract::State;
use axum::Json;

use super::client::{response_text, DaemonClient, GatewayError};
use crate::server::{Result, ServiceError};
use crate::types::chat::{GatewayChatRequest, GatewayChatResponse, HealthResponse};

pub async fn chat_handler(
    State(client): State<DaemonClient>,
    Json(request): Json<GatewayChatRequest>,
) -> Result<Json<GatewayChatResponse>> {
    if let Some(temperature) = request.temperature {
        // The daemon request carries only model and prompt
        tracing::debug!("Ignoring temperature {} for daemon request", temperature);
    }

    let body = client.generate(&request.prompt).await.map_err(|e| {
        if let GatewayError::Daemon { status, .. } = &e {
            tracing::warn!("Daemon answered HTTP {}", status);
        }
        ServiceError::internal(e)
    })?;

    Ok(Json(GatewayChatResponse::success(response_text(&body))))
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

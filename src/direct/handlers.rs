use axum::extract::State;
use axum::Json;

use super::DirectState;
use crate::inference::prompt::build_prompt;
use crate::inference::SamplingParams;
use crate::server::{Result, ServiceError};
use crate::system::watchdog::MemoryGuard;
use crate::types::chat::{CompletionRequest, CompletionResponse, StatusResponse, Usage};

fn check_memory(guard: &MemoryGuard) -> Result<()> {
    guard
        .check()
        .map_err(|e| ServiceError::Unavailable(e.to_string()))
}

pub async fn completions_handler(
    State(state): State<DirectState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>> {
    check_memory(&state.guard)?;

    let prompt = build_prompt(&request.messages);
    let params = SamplingParams::from_request(&request, state.context_size);

    state
        .generator
        .prepare()
        .await
        .map_err(ServiceError::internal)?;

    let _permit = state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(ServiceError::internal)?;

    // Loading the model or waiting for a permit may have taken a while
    check_memory(&state.guard)?;

    let generator = state.generator.clone();
    let generation = tokio::task::spawn_blocking(move || generator.generate(&prompt, &params))
        .await
        .map_err(ServiceError::internal)?
        .map_err(ServiceError::internal)?;

    check_memory(&state.guard)?;

    let usage = Usage::from_lengths(generation.input_tokens, generation.total_tokens);
    tracing::info!(
        "Completed chat: {} input + {} output tokens",
        usage.input_tokens,
        usage.output_tokens
    );

    Ok(Json(CompletionResponse {
        content: generation.text,
        usage,
    }))
}

pub async fn root_handler(State(state): State<DirectState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Direct inference service is running".to_string(),
        model: state.generator.model_id().to_string(),
    })
}

//! HTTP request and response bodies for both services

use serde::{Deserialize, Serialize};

use super::message::Turn;

/// `POST /chat` body on the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayChatResponse {
    pub response: String,
    pub status: String,
}

impl GatewayChatResponse {
    pub fn success(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            status: "success".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

/// `POST /v1/chat/completions` body on the direct-inference service
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Turn>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    /// Token accounting from sequence lengths before and after generation
    pub fn from_lengths(input_len: usize, total_len: usize) -> Self {
        let output_tokens = total_len.saturating_sub(input_len);
        Self {
            input_tokens: input_len,
            output_tokens,
            total_tokens: input_len + output_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Usage,
}

/// `GET /` on the direct-inference service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
    pub model: String,
}

/// Error body shared by both services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

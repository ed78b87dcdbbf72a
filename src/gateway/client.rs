//! Client for the local generation daemon (`/api/generate`)

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Daemon request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Ollama API error: {body}")]
    Daemon { status: u16, body: String },
    #[error("Invalid daemon response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    generate_url: String,
    model: String,
}

impl DaemonClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            generate_url: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    /// One round trip to the daemon; returns its JSON body on HTTP 200
    pub async fn generate(&self, prompt: &str) -> Result<Value, GatewayError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
        };

        let response = self.http.post(&self.generate_url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status != StatusCode::OK {
            return Err(GatewayError::Daemon {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_body(&text)
    }
}

/// A single JSON object, or the daemon's streaming form (one object per
/// line) folded into one object with the fragments joined
fn parse_body(text: &str) -> Result<Value, GatewayError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let mut response = String::new();
    let mut last: Option<Value> = None;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let chunk: Value = serde_json::from_str(line)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if let Some(fragment) = chunk.get("response").and_then(Value::as_str) {
            response.push_str(fragment);
        }
        last = Some(chunk);
    }

    let mut merged = last.ok_or_else(|| GatewayError::InvalidResponse("empty body".into()))?;
    if let Some(object) = merged.as_object_mut() {
        object.insert("response".to_string(), Value::String(response));
    }
    Ok(merged)
}

/// The generated text inside a daemon reply, empty when it carries none
pub fn response_text(body: &Value) -> String {
    body.get("response")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

//! Sampling parameters passed to the runtime

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::chat::CompletionRequest;

pub const DEFAULT_TOP_K: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// 0.0 means greedy decoding
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
    pub seed: u32,
}

impl SamplingParams {
    pub fn new(temperature: f32, top_p: f32, top_k: u32, max_tokens: u32) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        Self {
            temperature,
            top_p,
            top_k,
            max_tokens,
            seed,
        }
    }

    /// Take the request's values and bring them into range
    pub fn from_request(request: &CompletionRequest, context_size: u32) -> Self {
        let mut params = Self::new(
            request.temperature,
            request.top_p,
            request.top_k,
            request.max_tokens,
        );
        params.validate(context_size);
        params
    }

    pub fn validate(&mut self, context_size: u32) {
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            0.7
        };

        // top_p <= 0 would leave nothing to sample from
        self.top_p = if self.top_p.is_finite() && self.top_p > 0.0 {
            self.top_p.min(1.0)
        } else {
            1.0
        };

        if self.top_k == 0 {
            self.top_k = DEFAULT_TOP_K;
        }

        self.max_tokens = self.max_tokens.clamp(1, context_size.max(1));
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }
}

//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp for model loading and inference.

pub mod engine;
pub mod prompt;
pub mod sampling;

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::StorageError;
pub use sampling::SamplingParams;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to fetch model: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to initialise llama backend: {0}")]
    Backend(String),
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Failed to create context: {0}")]
    Context(String),
    #[error("Tokenization failed: {0}")]
    Tokenize(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Prompt is {prompt_tokens} tokens but the context window is {context_size}")]
    ContextOverflow {
        prompt_tokens: usize,
        context_size: usize,
    },
    #[error("Prompt produced no tokens")]
    EmptyPrompt,
    #[error("Model is not loaded")]
    NotLoaded,
    #[error("Inference task failed: {0}")]
    Task(String),
}

/// Output of one generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Decoded text of the whole sequence, prompt included
    pub text: String,
    /// Sequence length before generation
    pub input_tokens: usize,
    /// Sequence length after generation
    pub total_tokens: usize,
}

/// A model that turns a prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier of the model being served
    fn model_id(&self) -> &str;

    /// Make the model resident, fetching and loading it on first use
    async fn prepare(&self) -> Result<(), InferenceError>;

    /// Run one generation. Blocks for the whole duration of inference.
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<Generation, InferenceError>;
}

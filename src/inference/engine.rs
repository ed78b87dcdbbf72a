//! llama.cpp backed generator
//!
//! The GGUF model is fetched and loaded on first use and kept for the life of
//! the process. Every generation gets its own context, so concurrent requests
//! only share the read-only weights.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use tokio::sync::OnceCell;

use super::{Generation, InferenceError, SamplingParams, TextGenerator};
use crate::storage::huggingface::ModelStore;
use crate::types::config::DirectConfig;

/// Placement policy for the loaded model
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_id: String,
    pub gpu_layers: u32,
    pub context_size: u32,
    pub threads: Option<i32>,
}

impl From<&DirectConfig> for EngineConfig {
    fn from(config: &DirectConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            gpu_layers: config.gpu_layers,
            context_size: config.context_size,
            threads: config.threads,
        }
    }
}

struct LoadedModel {
    // Declared before the backend so the weights are freed first
    model: LlamaModel,
    backend: LlamaBackend,
}

pub struct LlamaEngine {
    config: EngineConfig,
    store: ModelStore,
    loaded: OnceCell<LoadedModel>,
}

impl LlamaEngine {
    pub fn new(config: EngineConfig, store: ModelStore) -> Self {
        Self {
            config,
            store,
            loaded: OnceCell::new(),
        }
    }

    fn context_params(&self) -> LlamaContextParams {
        let n_ctx = self.config.context_size;
        let mut params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx);
        if let Some(threads) = self.config.threads {
            params = params.with_n_threads(threads).with_n_threads_batch(threads);
        }
        params
    }
}

fn load_model(path: &Path, config: &EngineConfig) -> Result<LoadedModel, InferenceError> {
    tracing::info!(
        "Loading model {:?} (gpu_layers={}, context={})",
        path,
        config.gpu_layers,
        config.context_size
    );

    let backend = LlamaBackend::init().map_err(|e| InferenceError::Backend(e.to_string()))?;
    let model_params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);
    let model = LlamaModel::load_from_file(&backend, path, &model_params)
        .map_err(|e| InferenceError::Load(e.to_string()))?;

    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    tracing::info!(
        "Model loaded: {} ({}, {} parameters)",
        config.model_id,
        crate::storage::huggingface::format_size(size_bytes),
        model.n_params()
    );

    Ok(LoadedModel { model, backend })
}

fn build_sampler(params: &SamplingParams) -> LlamaSampler {
    if params.is_greedy() {
        return LlamaSampler::greedy();
    }

    LlamaSampler::chain_simple([
        LlamaSampler::top_k(params.top_k as i32),
        LlamaSampler::top_p(params.top_p, 1),
        LlamaSampler::temp(params.temperature),
        LlamaSampler::dist(params.seed),
    ])
}

fn decode_tokens(model: &LlamaModel, tokens: &[LlamaToken]) -> Result<String, InferenceError> {
    // Pieces can split UTF-8 sequences, so join bytes before converting
    let mut bytes = Vec::new();
    for &token in tokens {
        let piece = model
            .token_to_bytes(token, Special::Plaintext)
            .map_err(|e| InferenceError::Generation(e.to_string()))?;
        bytes.extend_from_slice(&piece);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl TextGenerator for LlamaEngine {
    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    async fn prepare(&self) -> Result<(), InferenceError> {
        self.loaded
            .get_or_try_init(|| async {
                let path: PathBuf = self.store.ensure_model(&self.config.model_id).await?;
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || load_model(&path, &config))
                    .await
                    .map_err(|e| InferenceError::Task(e.to_string()))?
            })
            .await?;
        Ok(())
    }

    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<Generation, InferenceError> {
        let loaded = self.loaded.get().ok_or(InferenceError::NotLoaded)?;
        let model = &loaded.model;

        let mut ctx = model
            .new_context(&loaded.backend, self.context_params())
            .map_err(|e| InferenceError::Context(e.to_string()))?;

        let tokens = model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| InferenceError::Tokenize(e.to_string()))?;
        if tokens.is_empty() {
            return Err(InferenceError::EmptyPrompt);
        }

        let n_ctx = ctx.n_ctx() as usize;
        if tokens.len() >= n_ctx {
            return Err(InferenceError::ContextOverflow {
                prompt_tokens: tokens.len(),
                context_size: n_ctx,
            });
        }
        let remaining = (params.max_tokens as usize).min(n_ctx - tokens.len());

        let mut batch = LlamaBatch::new(tokens.len(), 1);
        let last_index = tokens.len() as i32 - 1;
        for (i, &token) in (0_i32..).zip(tokens.iter()) {
            batch
                .add(token, i, &[0], i == last_index)
                .map_err(|e| InferenceError::Generation(e.to_string()))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| InferenceError::Generation(e.to_string()))?;

        let mut sampler = build_sampler(params);
        let mut sequence = tokens.clone();
        let mut n_cur = batch.n_tokens();

        for _ in 0..remaining {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            if model.is_eog_token(token) {
                break;
            }
            sequence.push(token);

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| InferenceError::Generation(e.to_string()))?;
            n_cur += 1;
            ctx.decode(&mut batch)
                .map_err(|e| InferenceError::Generation(e.to_string()))?;
        }

        let text = decode_tokens(model, &sequence)?;
        tracing::debug!(
            "Generated {} tokens from a {} token prompt",
            sequence.len() - tokens.len(),
            tokens.len()
        );

        Ok(Generation {
            text,
            input_tokens: tokens.len(),
            total_tokens: sequence.len(),
        })
    }
}

//! Direct-inference service
//!
//! Serves `/v1/chat/completions` from a GGUF model loaded into this process.
//! A watchdog thread keeps an eye on resident memory and requests are turned
//! away with a 503 while it is over the configured ceiling.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Semaphore;

use crate::inference::engine::{EngineConfig, LlamaEngine};
use crate::inference::TextGenerator;
use crate::server;
use crate::storage::huggingface::ModelStore;
use crate::system::gpu;
use crate::system::resources;
use crate::system::watchdog::{MemoryGuard, MemoryWatchdog};
use crate::types::config::DirectConfig;

#[derive(Clone)]
pub struct DirectState {
    pub generator: Arc<dyn TextGenerator>,
    pub guard: Arc<MemoryGuard>,
    /// Bounds how many generations run at once
    pub permits: Arc<Semaphore>,
    pub context_size: u32,
}

impl DirectState {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        guard: Arc<MemoryGuard>,
        max_concurrent: usize,
        context_size: u32,
    ) -> Self {
        Self {
            generator,
            guard,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            context_size,
        }
    }
}

pub fn build_router(state: DirectState) -> Router {
    let router = Router::new()
        .route("/", get(handlers::root_handler))
        .route("/v1/chat/completions", post(handlers::completions_handler))
        .with_state(state);

    server::with_common_layers(router)
}

fn log_placement(config: &DirectConfig) {
    let gpu = gpu::detect_gpu();
    if gpu.is_available {
        tracing::info!(
            "GPU: {} ({} MB VRAM), offloading {} layers",
            gpu.name,
            gpu.vram_total_mb,
            config.gpu_layers
        );
        if gpu.vram_usage_available {
            tracing::info!("VRAM in use before loading: {} MB", gpu.vram_used_mb);
        }
    } else if config.gpu_layers > 0 {
        tracing::warn!(
            "GPU_LAYERS={} but no GPU was detected, llama.cpp may fall back to CPU",
            config.gpu_layers
        );
    } else {
        tracing::info!("Running on CPU");
    }
}

pub async fn serve(config: DirectConfig) -> anyhow::Result<()> {
    log_placement(&config);

    let guard = Arc::new(MemoryGuard::new(config.memory_limit_mb));
    // Lives as long as the process
    MemoryWatchdog::spawn(
        &guard,
        MemoryWatchdog::DEFAULT_INTERVAL,
        resources::process_memory_mb,
    )?;
    tracing::info!("Memory watchdog started, limit {} MB", config.memory_limit_mb);

    let store = ModelStore::new(&config.models_dir)?;
    let engine = LlamaEngine::new(EngineConfig::from(&config), store);
    tracing::info!("Serving {} (loaded on first request)", config.model_id);

    let state = DirectState::new(
        Arc::new(engine),
        guard,
        config.max_concurrent_generations,
        config.context_size,
    );

    server::serve(build_router(state), config.bind).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{Generation, InferenceError, SamplingParams};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubGenerator {
        fail: bool,
        prepared: AtomicUsize,
        generated: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
        last_params: Mutex<Option<SamplingParams>>,
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        fn model_id(&self) -> &str {
            "stub/model-GGUF/model.gguf"
        }

        async fn prepare(&self) -> Result<(), InferenceError> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn generate(
            &self,
            prompt: &str,
            params: &SamplingParams,
        ) -> Result<Generation, InferenceError> {
            self.generated.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            *self.last_params.lock().unwrap() = Some(*params);
            if self.fail {
                return Err(InferenceError::Generation("decode failed".into()));
            }
            Ok(Generation {
                text: format!("{prompt}Assistant: Hello!"),
                input_tokens: 4,
                total_tokens: 9,
            })
        }
    }

    fn router_with(stub: Arc<StubGenerator>, guard: Arc<MemoryGuard>) -> Router {
        build_router(DirectState::new(stub, guard, 1, 2048))
    }

    fn completion_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_completion_success() {
        let stub = Arc::new(StubGenerator::default());
        let router = router_with(stub.clone(), Arc::new(MemoryGuard::new(1024)));

        let response = router
            .oneshot(completion_request(json!({
                "messages": [{"role": "user", "content": "Hi"}],
                "temperature": 0.3,
                "max_tokens": 64
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["content"], "User: Hi\nAssistant: Hello!");
        assert_eq!(
            body["usage"],
            json!({"input_tokens": 4, "output_tokens": 5, "total_tokens": 9})
        );

        assert_eq!(stub.last_prompt.lock().unwrap().as_deref(), Some("User: Hi\n"));
        let params = stub.last_params.lock().unwrap().unwrap();
        assert_eq!(params.temperature, 0.3);
        assert_eq!(params.max_tokens, 64);
        assert_eq!(params.top_k, 40);
        assert_eq!(stub.prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memory_breach_rejects_before_any_work() {
        let stub = Arc::new(StubGenerator::default());
        let guard = Arc::new(MemoryGuard::new(1024));
        guard.record(4096);
        let router = router_with(stub.clone(), guard);

        let response = router
            .oneshot(completion_request(json!({
                "messages": [{"role": "user", "content": "Hi"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().unwrap().contains("4096 MB"));

        assert_eq!(stub.prepared.load(Ordering::SeqCst), 0);
        assert_eq!(stub.generated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_is_500() {
        let stub = Arc::new(StubGenerator {
            fail: true,
            ..Default::default()
        });
        let router = router_with(stub, Arc::new(MemoryGuard::new(1024)));

        let response = router
            .oneshot(completion_request(json!({
                "messages": [{"role": "user", "content": "Hi"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({"detail": "Generation failed: decode failed"})
        );
    }

    #[tokio::test]
    async fn test_missing_messages_is_rejected() {
        let stub = Arc::new(StubGenerator::default());
        let router = router_with(stub.clone(), Arc::new(MemoryGuard::new(1024)));

        let response = router
            .oneshot(completion_request(json!({"temperature": 0.5})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(stub.generated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_root_status() {
        let stub = Arc::new(StubGenerator::default());
        let router = router_with(stub, Arc::new(MemoryGuard::new(1024)));

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "message": "Direct inference service is running",
                "model": "stub/model-GGUF/model.gguf"
            })
        );
    }
}

//! Configuration types
//!
//! Service configuration structures, loaded from the environment.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default model the gateway asks the daemon for
pub const DEFAULT_DAEMON_MODEL: &str = "phi";

/// Default GGUF loaded by the direct-inference service
pub const DEFAULT_MODEL_ID: &str = "TheBloke/phi-2-GGUF/phi-2.Q4_K_M.gguf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("Could not determine a models directory, set MODELS_DIR")]
    NoModelsDir,
}

/// Configuration of the gateway service
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to
    pub bind: SocketAddr,
    /// Base URL of the generation daemon
    pub daemon_url: String,
    /// Model name sent with every daemon request
    pub daemon_model: String,
    /// Outbound request timeout (None = wait forever)
    pub daemon_timeout: Option<Duration>,
    /// Maximum `/chat` requests per client address per minute
    pub rate_limit_per_minute: u32,
    /// Model asset fetched in the background on startup
    pub prefetch_model: Option<String>,
    /// Where the prefetched asset lands (`MODEL_PATH`, else the model cache)
    pub models_dir: PathBuf,
}

/// Configuration of the direct-inference service
#[derive(Debug, Clone)]
pub struct DirectConfig {
    pub bind: SocketAddr,
    /// HuggingFace identifier or local path of the GGUF file
    pub model_id: String,
    pub models_dir: PathBuf,
    /// Number of layers offloaded to the GPU (0 = CPU only)
    pub gpu_layers: u32,
    /// Context window in tokens
    pub context_size: u32,
    /// Worker threads for llama.cpp (None = runtime default)
    pub threads: Option<i32>,
    /// Resident memory ceiling; above it requests get a 503
    pub memory_limit_mb: u64,
    pub max_concurrent_generations: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host: IpAddr = parse_or(&lookup, "HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port: u16 = parse_or(&lookup, "PORT", 8000)?;
        let timeout_secs: Option<u64> = parse_opt(&lookup, "GATEWAY_TIMEOUT_SECS")?;

        let mut config = Self {
            bind: SocketAddr::new(host, port),
            daemon_url: string_or(&lookup, "OLLAMA_URL", "http://localhost:11434"),
            daemon_model: string_or(&lookup, "GATEWAY_MODEL", DEFAULT_DAEMON_MODEL),
            daemon_timeout: timeout_secs.map(Duration::from_secs),
            rate_limit_per_minute: parse_or(&lookup, "RATE_LIMIT_PER_MINUTE", 60)?,
            prefetch_model: non_empty(lookup("GATEWAY_PREFETCH_MODEL")),
            models_dir: match non_empty(lookup("MODEL_PATH")) {
                Some(path) => PathBuf::from(path),
                None => models_dir(&lookup)?,
            },
        };
        config.validate();
        Ok(config)
    }

    /// Normalize values that have a safe fallback
    pub fn validate(&mut self) {
        while self.daemon_url.ends_with('/') {
            self.daemon_url.pop();
        }
        if self.rate_limit_per_minute == 0 {
            tracing::warn!("RATE_LIMIT_PER_MINUTE=0 would reject everything, using 60");
            self.rate_limit_per_minute = 60;
        }
        if self.daemon_model.trim().is_empty() {
            self.daemon_model = DEFAULT_DAEMON_MODEL.to_string();
        }
    }
}

impl DirectConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host: IpAddr = parse_or(&lookup, "HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port: u16 = parse_or(&lookup, "PORT", 8001)?;

        let mut config = Self {
            bind: SocketAddr::new(host, port),
            model_id: string_or(&lookup, "MODEL_ID", DEFAULT_MODEL_ID),
            models_dir: models_dir(&lookup)?,
            gpu_layers: parse_or(&lookup, "GPU_LAYERS", 0)?,
            context_size: parse_or(&lookup, "CONTEXT_SIZE", 2048)?,
            threads: parse_opt(&lookup, "THREADS")?,
            memory_limit_mb: parse_or(&lookup, "MEMORY_LIMIT_MB", 12288)?,
            max_concurrent_generations: parse_or(&lookup, "MAX_CONCURRENT_GENERATIONS", 1)?,
        };
        config.validate();
        Ok(config)
    }

    pub fn validate(&mut self) {
        self.context_size = self.context_size.clamp(512, 131072);
        if self.max_concurrent_generations == 0 {
            self.max_concurrent_generations = 1;
        }
        if let Some(threads) = self.threads {
            if threads <= 0 {
                self.threads = None;
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    non_empty(lookup(key)).unwrap_or_else(|| default.to_string())
}

fn parse_opt<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup(key)) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn models_dir(lookup: &impl Fn(&str) -> Option<String>) -> Result<PathBuf, ConfigError> {
    match non_empty(lookup("MODELS_DIR")) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => crate::storage::get_data_dir()
            .map(|dir| dir.join("models"))
            .map_err(|_| ConfigError::NoModelsDir),
    }
}

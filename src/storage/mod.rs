//! Persistent storage
//!
//! This module handles the on-disk model cache.

pub mod huggingface;

use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not determine the application data directory")]
    NoDataDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid model identifier: {0}")]
    InvalidModelId(String),
    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("No GGUF files found in {0}")]
    NoGgufFiles(String),
    #[error("Multiple GGUF files found. Please specify one of: {}", .0.join(", "))]
    AmbiguousModel(Vec<String>),
    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
}

/// Platform data directory for clawserve (e.g. `~/.local/share/clawserve`)
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("dev", "clawserve", "clawserve")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}

//! HuggingFace model store
//!
//! Resolves model identifiers to GGUF files in the local cache, downloading
//! them from HuggingFace Hub when absent.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::storage::StorageError;

pub const HF_BASE_URL: &str = "https://huggingface.co";

/// Parse a HuggingFace URL to extract model info
#[derive(Debug, Clone)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

fn sanitize_local_filename(filename: &str) -> Result<String, StorageError> {
    let invalid_name = || StorageError::InvalidModelId(format!("invalid model filename {filename:?}"));

    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(invalid_name());
    }

    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let no_leading = no_fragment.trim_start_matches('/');

    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(invalid_name());
    }

    Ok(sanitized)
}

impl HuggingFaceUrl {
    /// Parse various HuggingFace URL formats
    pub fn parse(url: &str) -> Result<Self, StorageError> {
        // Accepted formats:
        // 1. https://huggingface.co/username/repo/blob/main/model.gguf
        // 2. https://huggingface.co/username/repo/resolve/main/model.gguf
        // 3. username/repo/model.gguf
        // 4. username/repo

        let url = url.trim();
        // A local path that does not exist is not a repo name
        if url.starts_with('/') || url.starts_with('.') || url.contains('\\') {
            return Err(StorageError::InvalidModelId(format!(
                "{url} is neither an existing file nor a HuggingFace model"
            )));
        }
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);

        if url.contains("huggingface.co") {
            let path = url
                .replace("https://huggingface.co/", "")
                .replace("http://huggingface.co/", "");

            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            if parts.len() < 2 {
                return Err(StorageError::InvalidModelId(url.to_string()));
            }

            let repo_id = format!("{}/{}", parts[0], parts[1]);

            if let Some(marker) = parts.iter().position(|&p| p == "blob" || p == "resolve") {
                if parts.len() > marker + 2 {
                    return Ok(Self {
                        repo_id,
                        filename: parts[marker + 2..].join("/"),
                        revision: parts[marker + 1].to_string(),
                    });
                }
            }

            return Ok(Self {
                repo_id,
                filename: String::new(),
                revision: "main".to_string(),
            });
        }

        let parts: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 2 {
            let repo_id = format!("{}/{}", parts[0], parts[1]);
            let filename = if parts.len() > 2 {
                parts[2..].join("/")
            } else {
                String::new()
            };
            return Ok(Self {
                repo_id,
                filename,
                revision: "main".to_string(),
            });
        }

        Err(StorageError::InvalidModelId(url.to_string()))
    }

    /// Build the download URL for the file
    pub fn download_url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            base_url, self.repo_id, self.revision, self.filename
        )
    }
}

#[derive(Debug, serde::Deserialize)]
struct FileInfo {
    path: String,
}

/// On-disk cache of GGUF model files
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
    base_url: String,
    client: reqwest::Client,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3600)) // 1 hour timeout for large models
            .user_agent(concat!("clawserve/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            models_dir: models_dir.into(),
            base_url: HF_BASE_URL.to_string(),
            client,
        })
    }

    /// Point the store at a different hub (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Where `model_id` lives locally, without touching the network.
    ///
    /// Returns `None` when the identifier names a repository but no file, since
    /// the filename has to be discovered from the hub first.
    pub fn local_path(&self, model_id: &str) -> Result<Option<PathBuf>, StorageError> {
        let direct = Path::new(model_id);
        if direct.is_file() {
            return Ok(Some(direct.to_path_buf()));
        }

        let hf_url = HuggingFaceUrl::parse(model_id)?;
        if hf_url.filename.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.models_dir.join(sanitize_local_filename(&hf_url.filename)?)))
    }

    pub fn is_cached(&self, model_id: &str) -> bool {
        match self.local_path(model_id) {
            Ok(Some(path)) => is_non_empty_file(&path),
            _ => false,
        }
    }

    /// Return the local path of `model_id`, downloading it first if needed
    pub async fn ensure_model(&self, model_id: &str) -> Result<PathBuf, StorageError> {
        if let Some(path) = self.local_path(model_id)? {
            if is_non_empty_file(&path) {
                tracing::info!("Model already exists: {:?}", path);
                return Ok(path);
            }
        }

        let mut hf_url = HuggingFaceUrl::parse(model_id)?;

        if hf_url.filename.is_empty() {
            let files = self.list_gguf_files(&hf_url.repo_id, &hf_url.revision).await?;
            hf_url.filename = match files.as_slice() {
                [] => return Err(StorageError::NoGgufFiles(hf_url.repo_id.clone())),
                [single] => single.clone(),
                _ => return Err(StorageError::AmbiguousModel(files)),
            };
        }

        let safe_filename = sanitize_local_filename(&hf_url.filename)?;
        let output_path = self.models_dir.join(&safe_filename);
        if is_non_empty_file(&output_path) {
            tracing::info!("Model already exists: {:?}", output_path);
            return Ok(output_path);
        }

        let mut last_decile = 0;
        self.download_file(&hf_url, &safe_filename, move |downloaded, total| {
            if total == 0 {
                return;
            }
            let decile = downloaded * 10 / total;
            if decile > last_decile {
                last_decile = decile;
                tracing::info!(
                    "Download progress: {}% ({} / {})",
                    decile * 10,
                    format_size(downloaded),
                    format_size(total)
                );
            }
        })
        .await
    }

    async fn download_file(
        &self,
        hf_url: &HuggingFaceUrl,
        safe_filename: &str,
        mut progress_callback: impl FnMut(u64, u64) + Send,
    ) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.models_dir)?;

        let output_path = self.models_dir.join(safe_filename);
        let temp_path = self.models_dir.join(format!("{}.tmp", safe_filename));

        let download_url = hf_url.download_url(&self.base_url);
        tracing::info!("Downloading from: {}", download_url);

        let mut response = self.client.get(&download_url).send().await?;

        if !response.status().is_success() {
            return Err(StorageError::Status {
                url: download_url,
                status: response.status().as_u16(),
            });
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            tracing::info!("File size: {} ({} bytes)", format_size(total), total);
        }

        // Write to temp file first
        if let Err(e) =
            write_body(&mut response, &temp_path, total_size, &mut progress_callback).await
        {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Rename temp file to final location (atomic operation)
        fs::rename(&temp_path, &output_path)?;

        tracing::info!("Download complete: {:?}", output_path);

        Ok(output_path)
    }

    /// List available GGUF files in a HuggingFace repository
    async fn list_gguf_files(
        &self,
        repo_id: &str,
        revision: &str,
    ) -> Result<Vec<String>, StorageError> {
        let api_url = format!("{}/api/models/{}/tree/{}", self.base_url, repo_id, revision);

        let response = self.client.get(&api_url).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::Status {
                url: api_url,
                status: response.status().as_u16(),
            });
        }

        let files: Vec<FileInfo> = response.json().await?;

        Ok(files
            .into_iter()
            .filter(|f| f.path.ends_with(".gguf"))
            .map(|f| f.path)
            .collect())
    }
}

async fn write_body(
    response: &mut reqwest::Response,
    temp_path: &Path,
    total_size: Option<u64>,
    progress_callback: &mut (impl FnMut(u64, u64) + Send),
) -> Result<(), StorageError> {
    let mut temp_file = File::create(temp_path).await?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        temp_file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress_callback(downloaded, total_size.unwrap_or(0));
    }
    temp_file.flush().await?;

    match total_size {
        Some(expected) if downloaded != expected => Err(StorageError::Incomplete {
            got: downloaded,
            expected,
        }),
        _ => Ok(()),
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};

    const WEIGHTS: &[u8] = b"GGUF fake weights";

    async fn spawn_fake_hub(files: &'static [&'static str]) -> String {
        let listing: Vec<serde_json::Value> = files
            .iter()
            .map(|path| serde_json::json!({ "path": path }))
            .collect();

        let app = Router::new()
            .route(
                "/api/models/{owner}/{repo}/tree/{revision}",
                get(move || {
                    let listing = listing.clone();
                    async move { Json(listing) }
                }),
            )
            .route(
                "/{owner}/{repo}/resolve/{revision}/{file}",
                get(|| async { WEIGHTS.to_vec() }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_hf_url_full() {
        let url = "https://huggingface.co/TheBloke/Llama-2-7B-GGUF/blob/main/llama-2-7b.Q4_K_M.gguf";
        let parsed = HuggingFaceUrl::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "TheBloke/Llama-2-7B-GGUF");
        assert_eq!(parsed.filename, "llama-2-7b.Q4_K_M.gguf");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_hf_url_short() {
        let url = "TheBloke/Llama-2-7B-GGUF/llama-2-7b.Q4_K_M.gguf";
        let parsed = HuggingFaceUrl::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "TheBloke/Llama-2-7B-GGUF");
        assert_eq!(parsed.filename, "llama-2-7b.Q4_K_M.gguf");
    }

    #[test]
    fn test_parse_hf_url_repo_only() {
        let parsed = HuggingFaceUrl::parse("TheBloke/Llama-2-7B-GGUF").unwrap();
        assert_eq!(parsed.repo_id, "TheBloke/Llama-2-7B-GGUF");
        assert_eq!(parsed.filename, "");
    }

    #[test]
    fn test_parse_rejects_bare_name() {
        assert!(HuggingFaceUrl::parse("phi").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_local_paths() {
        for id in ["/models/phi.gguf", "./phi.gguf", "../models/phi.gguf", "C:\\models\\phi.gguf"] {
            assert!(
                matches!(HuggingFaceUrl::parse(id), Err(StorageError::InvalidModelId(_))),
                "{id} should be rejected"
            );
        }
    }

    #[test]
    fn test_sanitize_nested_filename() {
        assert_eq!(
            sanitize_local_filename("q4/model:v2.gguf").unwrap(),
            "q4__model_v2.gguf"
        );
        assert!(sanitize_local_filename("  ").is_err());
    }

    #[test]
    fn test_local_path_prefers_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("local.gguf");
        fs::write(&model, WEIGHTS).unwrap();

        let store = ModelStore::new(dir.path().join("cache")).unwrap();
        let id = model.to_string_lossy().to_string();
        assert_eq!(store.local_path(&id).unwrap(), Some(model));
        assert!(store.is_cached(&id));
    }

    #[tokio::test]
    async fn test_ensure_model_downloads_once() {
        let base = spawn_fake_hub(&["phi-2.Q4_K_M.gguf"]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap().with_base_url(&base);

        let id = "TheBloke/phi-2-GGUF/phi-2.Q4_K_M.gguf";
        assert!(!store.is_cached(id));

        let path = store.ensure_model(id).await.unwrap();
        assert_eq!(fs::read(&path).unwrap(), WEIGHTS);
        assert!(store.is_cached(id));
        assert!(!dir.path().join("phi-2.Q4_K_M.gguf.tmp").exists());

        // Cached: an unreachable hub must not matter
        let offline = store.clone().with_base_url("http://127.0.0.1:9");
        assert_eq!(offline.ensure_model(id).await.unwrap(), path);
    }

    /// Promises more bytes than it sends, then hangs up
    async fn spawn_truncating_hub() -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\nGGUF partial")
                    .await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_temp_file() {
        let base = spawn_truncating_hub().await;
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap().with_base_url(&base);

        let id = "TheBloke/phi-2-GGUF/phi-2.Q4_K_M.gguf";
        let err = store.ensure_model(id).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Http(_) | StorageError::Incomplete { .. }
        ));
        assert!(!dir.path().join("phi-2.Q4_K_M.gguf.tmp").exists());
        assert!(!store.is_cached(id));
    }

    #[tokio::test]
    async fn test_missing_local_path_never_reaches_hub() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path())
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        let missing = dir.path().join("nowhere.gguf");
        let err = store
            .ensure_model(&missing.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidModelId(_)));
    }

    #[tokio::test]
    async fn test_ensure_model_discovers_single_gguf() {
        let base = spawn_fake_hub(&["README.md", "model.Q8_0.gguf"]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap().with_base_url(&base);

        let path = store.ensure_model("someone/model-GGUF").await.unwrap();
        assert_eq!(path, dir.path().join("model.Q8_0.gguf"));
    }

    #[tokio::test]
    async fn test_ensure_model_ambiguous_repo() {
        let base = spawn_fake_hub(&["a.Q4.gguf", "a.Q8.gguf"]).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap().with_base_url(&base);

        let err = store.ensure_model("someone/model-GGUF").await.unwrap_err();
        assert!(matches!(err, StorageError::AmbiguousModel(ref files) if files.len() == 2));
    }
}

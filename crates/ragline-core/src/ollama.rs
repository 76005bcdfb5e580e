//! Ollama embedding service. Wraps the async ollama-rs client behind the
//! blocking [`EmbeddingService`] interface.

use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use std::time::Duration;

use ollama_rs::Ollama;
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::embedder::EmbeddingService;
use crate::http::{self, ServiceError};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Blocking client for Ollama's embedding endpoint.
///
/// Owns a single-threaded runtime; do not call it from inside another async
/// runtime (offload with `spawn_blocking` instead).
#[derive(Debug)]
pub struct OllamaEmbeddings {
    inner: Ollama,
    embed_model: String,
    timeout: Duration,
    runtime: Runtime,
}

impl OllamaEmbeddings {
    /// Create from URL string. Default: http://localhost:11434.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(OllamaError::Runtime)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            timeout: http::DEFAULT_TIMEOUT,
            runtime,
        })
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Upper bound on one embedding call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl EmbeddingService for OllamaEmbeddings {
    fn name(&self) -> &str {
        "ollama"
    }

    /// Embed multiple strings in one call. Returns one embedding per input.
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let timeout = self.timeout;
        let call = self.inner.generate_embeddings(req);
        // The timer must be created inside the runtime.
        let res = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, call).await })
            .map_err(|_| ServiceError::Transient(format!("Ollama request timed out after {timeout:?}")))?
            .map_err(|e| ServiceError::Transient(format!("Ollama request failed: {e}")))?;
        Ok(res.embeddings)
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("failed to start Ollama client runtime: {0}")]
    Runtime(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_parses() {
        let client = OllamaEmbeddings::from_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(client.embed_model(), DEFAULT_EMBED_MODEL);
        assert_eq!(client.name(), "ollama");
    }

    #[test]
    fn model_can_be_overridden() {
        let client = OllamaEmbeddings::from_url(DEFAULT_BASE_URL)
            .unwrap()
            .with_embed_model("all-minilm");
        assert_eq!(client.embed_model(), "all-minilm");
    }

    #[test]
    fn timeout_defaults_and_overrides() {
        let client = OllamaEmbeddings::from_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(client.timeout(), http::DEFAULT_TIMEOUT);
        let client = client.with_timeout(Duration::from_secs(3));
        assert_eq!(client.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(
            OllamaEmbeddings::from_url("not a url"),
            Err(OllamaError::ParseUrl(_))
        ));
    }

    #[test]
    fn empty_batch_skips_the_network() {
        let mut client = OllamaEmbeddings::from_url(DEFAULT_BASE_URL).unwrap();
        assert!(client.embed_batch(&[]).unwrap().is_empty());
    }
}

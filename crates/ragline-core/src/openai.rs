//! OpenAI-compatible `/embeddings` endpoint over blocking reqwest.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::embedder::EmbeddingService;
use crate::error::ConfigurationError;
use crate::http::{self, ServiceError};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ConfigurationError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ConfigurationError::Missing("embedding.api_key"));
        }
        let endpoint = embeddings_endpoint(base_url)?;
        let client = http::build_client(timeout, HeaderMap::new()).map_err(|e| ConfigurationError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model: DEFAULT_OPENAI_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl EmbeddingService for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = http::send(
            self.client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(&body),
        )?;
        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        Ok(into_ordered(parsed))
    }
}

fn embeddings_endpoint(base_url: &str) -> Result<Url, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidUrl {
        url: base_url.to_string(),
        reason,
    };
    let mut base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("embeddings").map_err(|e| invalid(e.to_string()))
}

/// The API may answer out of order; `index` is authoritative.
fn into_ordered(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

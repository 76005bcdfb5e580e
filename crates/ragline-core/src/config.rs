//! Persisted settings (chunking, embedding service, backends) in the app data directory.
//!
//! Every section has defaults, so a missing or partial `config.toml` still
//! yields a usable config. Secrets can come from the environment instead of
//! the file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{ChunkParams, DEFAULT_MAX_CHARS, DEFAULT_OVERLAP};
use crate::embedder::{
    EmbedderConfig, EmbeddingService, HashingEmbeddings, DEFAULT_BATCH_SIZE, DEFAULT_HASHING_DIMENSION,
};
use crate::error::ConfigurationError;
use crate::http;
use crate::ollama::{self, OllamaEmbeddings, OllamaError};
use crate::openai::{self, OpenAiEmbeddings};
use crate::pinecone::{self, PineconeConfig};
use crate::retry::{self, RetryPolicy};
use crate::weaviate::{self, WeaviateConfig};

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingSection,
    pub embedding: EmbeddingSection,
    pub retry: RetrySection,
    pub retrieval: RetrievalSection,
    pub pinecone: PineconeSection,
    pub weaviate: WeaviateSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    pub max_length: usize,
    pub overlap: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_CHARS,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline token hashing; no service needed.
    Hashing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub provider: EmbeddingProvider,
    /// Provider default when unset.
    pub model: Option<String>,
    /// Service base URL; provider default when unset.
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Probed from the service when unset.
    pub dimension: Option<usize>,
    pub batch_size: Option<usize>,
    /// Per-request timeout for the embedding service.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: retry::DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: retry::DEFAULT_MAX_DELAY.as_millis() as u64,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PineconeSection {
    pub api_key: Option<String>,
    pub index: String,
    pub cloud: String,
    pub region: String,
    pub namespace: String,
    pub timeout_secs: Option<u64>,
}

impl Default for PineconeSection {
    fn default() -> Self {
        Self {
            api_key: None,
            index: pinecone::DEFAULT_INDEX.to_string(),
            cloud: pinecone::DEFAULT_CLOUD.to_string(),
            region: pinecone::DEFAULT_REGION.to_string(),
            namespace: String::new(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaviateSection {
    pub url: String,
    pub api_key: Option<String>,
    pub class_name: String,
    pub timeout_secs: Option<u64>,
}

impl Default for WeaviateSection {
    fn default() -> Self {
        Self {
            url: weaviate::DEFAULT_URL.to_string(),
            api_key: None,
            class_name: weaviate::DEFAULT_CLASS.to_string(),
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Overrides secrets and endpoints from environment variables
    /// (`OPENAI_API_KEY`, `PINECONE_API_KEY`, `WEAVIATE_URL`, `WEAVIATE_API_KEY`).
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if self.embedding.provider == EmbeddingProvider::OpenAi {
            if let Some(key) = get("OPENAI_API_KEY") {
                self.embedding.api_key = Some(key);
            }
        }
        if let Some(key) = get("PINECONE_API_KEY") {
            self.pinecone.api_key = Some(key);
        }
        if let Some(url) = get("WEAVIATE_URL") {
            self.weaviate.url = url;
        }
        if let Some(key) = get("WEAVIATE_API_KEY") {
            self.weaviate.api_key = Some(key);
        }
    }

    /// The config as it would be written to `config.toml`.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts, Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms.max(self.retry.base_delay_ms)))
            .with_jitter(self.retry.jitter)
    }

    pub fn chunk_params(&self) -> Result<ChunkParams, ConfigurationError> {
        ChunkParams::new(self.chunking.max_length, self.chunking.overlap)
    }

    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            dimension: self.embedding.dimension,
            batch_size: self.embedding.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            retry: self.retry_policy(),
        }
    }

    pub fn embedding_timeout(&self) -> Duration {
        timeout_or_default(self.embedding.timeout_secs)
    }

    /// Builds the configured embedding service.
    pub fn embedding_service(&self) -> Result<Box<dyn EmbeddingService>, ConfigError> {
        let e = &self.embedding;
        let service: Box<dyn EmbeddingService> = match e.provider {
            EmbeddingProvider::Ollama => {
                let url = e.url.as_deref().unwrap_or(ollama::DEFAULT_BASE_URL);
                let client = OllamaEmbeddings::from_url(url)?.with_timeout(self.embedding_timeout());
                Box::new(match &e.model {
                    Some(model) => client.with_embed_model(model),
                    None => client,
                })
            }
            EmbeddingProvider::OpenAi => {
                let url = e.url.as_deref().unwrap_or(openai::DEFAULT_OPENAI_URL);
                let key = e.api_key.clone().unwrap_or_default();
                let client = OpenAiEmbeddings::new(url, key, self.embedding_timeout())?;
                Box::new(match &e.model {
                    Some(model) => client.with_model(model),
                    None => client,
                })
            }
            EmbeddingProvider::Hashing => {
                Box::new(HashingEmbeddings::new(e.dimension.unwrap_or(DEFAULT_HASHING_DIMENSION)))
            }
        };
        Ok(service)
    }

    pub fn pinecone_config(&self, dimension: usize) -> Result<PineconeConfig, ConfigurationError> {
        let key = self
            .pinecone
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigurationError::Missing("pinecone.api_key (or PINECONE_API_KEY)"))?;
        let mut config = PineconeConfig::new(key, &self.pinecone.index, dimension);
        config.cloud = self.pinecone.cloud.clone();
        config.region = self.pinecone.region.clone();
        config.namespace = self.pinecone.namespace.clone();
        config.timeout = timeout_or_default(self.pinecone.timeout_secs);
        config.retry = self.retry_policy();
        Ok(config)
    }

    pub fn weaviate_config(&self, dimension: usize) -> WeaviateConfig {
        let mut config = WeaviateConfig::new(&self.weaviate.url, dimension);
        if let Some(key) = &self.weaviate.api_key {
            config = config.with_api_key(key);
        }
        config.class_name = self.weaviate.class_name.clone();
        config.timeout = timeout_or_default(self.weaviate.timeout_secs);
        config.retry = self.retry_policy();
        config
    }
}

fn timeout_or_default(secs: Option<u64>) -> Duration {
    secs.map_or(http::DEFAULT_TIMEOUT, Duration::from_secs)
}

/// Path of the config file, if the app data directory can be determined.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
/// Environment overrides are not applied here.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    let Ok(s) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    toml::from_str(&s).unwrap_or_default()
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    let s = config.to_toml_string()?;
    std::fs::write(&path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to set up Ollama client: {0}")]
    Ollama(#[from] OllamaError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            max_length = 200

            [embedding]
            provider = "openai"
            model = "text-embedding-3-large"

            [weaviate]
            class_name = "Notes"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_length, 200);
        assert_eq!(config.chunking.overlap, DEFAULT_OVERLAP);
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(config.weaviate.class_name, "Notes");
        assert_eq!(config.weaviate.url, weaviate::DEFAULT_URL);
        assert_eq!(config.pinecone.index, pinecone::DEFAULT_INDEX);
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.embedding.dimension = Some(128);
        config.pinecone.api_key = Some("pk".into());
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("provider = \"hashing\""));
        assert!(text.contains("[weaviate]"));
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }

    #[test]
    fn environment_overrides_secrets() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::OpenAi;
        config.apply_env_with(|name| match name {
            "OPENAI_API_KEY" => Some("sk-test".into()),
            "PINECONE_API_KEY" => Some("pc-test".into()),
            "WEAVIATE_URL" => Some("https://cluster.example".into()),
            "WEAVIATE_API_KEY" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.pinecone.api_key.as_deref(), Some("pc-test"));
        assert_eq!(config.weaviate.url, "https://cluster.example");
        assert_eq!(config.weaviate.api_key, None);
    }

    #[test]
    fn builders_carry_settings() {
        let mut config = Config::default();
        config.retry = RetrySection {
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 50,
            jitter: false,
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.max_delay, Duration::from_millis(100));
        assert!(!policy.jitter);

        assert!(matches!(config.pinecone_config(8), Err(ConfigurationError::Missing(_))));
        config.pinecone.api_key = Some("pk".into());
        let pc = config.pinecone_config(8).unwrap();
        assert_eq!((pc.index.as_str(), pc.dimension), (pinecone::DEFAULT_INDEX, 8));
        assert_eq!(pc.retry, policy);

        config.weaviate.api_key = Some("wk".into());
        let wv = config.weaviate_config(8);
        assert_eq!(wv.api_key.as_deref(), Some("wk"));
        assert_eq!(wv.class_name, weaviate::DEFAULT_CLASS);
    }

    #[test]
    fn timeouts_reach_every_service() {
        let mut config = Config::default();
        config.pinecone.api_key = Some("pk".into());
        assert_eq!(config.embedding_timeout(), http::DEFAULT_TIMEOUT);
        assert_eq!(config.pinecone_config(8).unwrap().timeout, http::DEFAULT_TIMEOUT);
        assert_eq!(config.weaviate_config(8).timeout, http::DEFAULT_TIMEOUT);

        let config: Config = toml::from_str(
            r#"
            [embedding]
            timeout_secs = 5
            [pinecone]
            api_key = "pk"
            timeout_secs = 7
            [weaviate]
            timeout_secs = 9
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding_timeout(), Duration::from_secs(5));
        assert_eq!(config.pinecone_config(8).unwrap().timeout, Duration::from_secs(7));
        assert_eq!(config.weaviate_config(8).timeout, Duration::from_secs(9));
    }

    #[test]
    fn invalid_chunking_is_reported() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.max_length;
        assert!(matches!(config.chunk_params(), Err(ConfigurationError::InvalidOverlap { .. })));
    }

    #[test]
    fn hashing_provider_needs_no_service() {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.embedding.dimension = Some(32);
        let mut service = config.embedding_service().unwrap();
        assert_eq!(service.name(), "hashing");
        assert_eq!(service.embed_batch(&["hi".to_string()]).unwrap()[0].len(), 32);
    }
}

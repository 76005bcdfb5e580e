//! Turns text into fixed-dimension vectors through a pluggable embedding service.
//!
//! The [`Embedder`] owns the batching, retry and dimension bookkeeping; an
//! [`EmbeddingService`] only has to answer one batch request.

use thiserror::Error;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::http::ServiceError;
use crate::retry::{Attempted, RetryPolicy};

pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Text embedded once at construction when no dimension is configured.
const DIMENSION_PROBE: &str = "dimension probe";

/// One round-trip to an embedding backend.
pub trait EmbeddingService: Send {
    fn name(&self) -> &str;

    /// Embeds every text in one request. Must return one vector per text, in order.
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedderConfig {
    /// Expected vector length. `None` probes the service once.
    pub dimension: Option<usize>,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            dimension: None,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Batches, retries and validates calls to an [`EmbeddingService`].
pub struct Embedder {
    service: Box<dyn EmbeddingService>,
    dimension: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("service", &self.service.name())
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Embedder {
    /// Fixes the dimension for the lifetime of the embedder, probing the
    /// service if the config does not name one.
    pub fn new(service: Box<dyn EmbeddingService>, config: EmbedderConfig) -> Result<Self, EmbedError> {
        if config.batch_size == 0 {
            return Err(ConfigurationError::InvalidBatchSize.into());
        }
        let mut embedder = Self {
            service,
            dimension: 0,
            batch_size: config.batch_size,
            retry: config.retry,
        };
        embedder.dimension = match config.dimension {
            Some(0) => return Err(ConfigurationError::ZeroDimension.into()),
            Some(d) => d,
            None => {
                let probe = embedder.call(&[DIMENSION_PROBE.to_string()])?;
                let d = probe.first().map_or(0, Vec::len);
                if d == 0 {
                    return Err(ConfigurationError::ZeroDimension.into());
                }
                debug!("probed {} embedding dimension: {d}", embedder.service.name());
                d
            }
        };
        Ok(embedder)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Embed texts in batches. All-or-nothing: any failed batch fails the call.
    pub fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("embedding batch of {} via {}", batch.len(), self.service.name());
            let embedded = self.call(batch)?;
            if embedded.len() != batch.len() {
                return Err(ConfigurationError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                }
                .into());
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != self.dimension) {
                return Err(ConfigurationError::DimensionMismatch {
                    expected: self.dimension,
                    actual: bad.len(),
                }
                .into());
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Embed a single string. Returns the embedding vector.
    pub fn embed_one(&mut self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()])?;
        Ok(vectors.pop().unwrap_or_default())
    }

    fn call(&mut self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let service = &mut self.service;
        let what = format!("{} embedding", service.name());
        self.retry
            .run(&what, || service.embed_batch(batch), ServiceError::is_transient)
            .map_err(EmbedError::from)
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service unavailable after {attempts} attempt(s): {reason}")]
    ServiceUnavailable { attempts: u32, reason: String },
    #[error("embedding service rejected credentials: {0}")]
    Auth(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl From<Attempted<ServiceError>> for EmbedError {
    fn from(failure: Attempted<ServiceError>) -> Self {
        let reason = failure.error.to_string();
        match failure.error {
            ServiceError::RateLimited(_) | ServiceError::Transient(_) => EmbedError::ServiceUnavailable {
                attempts: failure.attempts,
                reason,
            },
            ServiceError::Auth(msg) => EmbedError::Auth(msg),
            _ => EmbedError::Request(reason),
        }
    }
}

/// Deterministic offline embeddings: lowercase word tokens hashed into a
/// fixed number of signed buckets, then scaled to unit length.
///
/// Texts sharing words land close together, which is enough for demos and
/// tests without a model.
#[derive(Debug, Clone)]
pub struct HashingEmbeddings {
    dimension: usize,
}

impl HashingEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbeddings {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl EmbeddingService for HashingEmbeddings {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

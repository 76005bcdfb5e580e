//! Configuration errors shared by every stage of the pipeline.
//!
//! These are never retried: they mean the caller (or the deployment) asked for
//! something the pipeline cannot honour.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("chunk max_length must be positive")]
    InvalidChunkSize,
    #[error("chunk overlap ({overlap}) must be smaller than max_length ({max_length})")]
    InvalidOverlap { overlap: usize, max_length: usize },
    #[error("top_k must be positive")]
    InvalidTopK,
    #[error("batch size must be positive")]
    InvalidBatchSize,
    #[error("embedding dimension must be positive")]
    ZeroDimension,
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding service returned {actual} vector(s) for {expected} input(s)")]
    CountMismatch { expected: usize, actual: usize },
    #[error("invalid metadata key {0:?} (expected [a-z_][A-Za-z0-9_]*)")]
    InvalidMetadataKey(String),
    #[error("metadata key {0:?} is reserved")]
    ReservedMetadataKey(String),
    #[error("got {metadata} metadata map(s) for {texts} text(s)")]
    MetadataLength { texts: usize, metadata: usize },
    #[error("got {ids} id(s) for {texts} text(s)")]
    IdLength { texts: usize, ids: usize },
    #[error("invalid collection name {0:?} (expected [A-Z][A-Za-z0-9_]*)")]
    InvalidCollectionName(String),
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("missing setting: {0}")]
    Missing(&'static str),
}

//! Retrieval pipeline independent of the front-end that drives it.
//!
//! Documents are chunked ([chunks]), embedded ([embedder]) and stored in one
//! or more vector stores ([backend]); queries are ranked on a common score
//! scale ([normalize]) so stores can be compared side by side ([compare]).
//! Every call blocks; front-ends that need responsiveness run it on a worker
//! thread.

pub mod app_data;
pub mod backend;
pub mod chunks;
pub mod compare;
pub mod config;
pub mod documents;
pub mod embedder;
pub mod error;
mod http;
pub mod memory;
pub mod metadata;
pub mod normalize;
pub mod ollama;
pub mod openai;
pub mod pinecone;
pub mod retriever;
pub mod retry;
pub mod weaviate;

pub use app_data::app_data_dir;
pub use backend::{BackendError, BackendKind, Record, ScoreKind, UpsertReport, VectorBackend};
pub use chunks::{chunk, reassemble, ChunkParams, Segment};
pub use compare::{BackendQueryFailure, Comparison};
pub use config::{config_path, load_config, save_config, Config, ConfigError};
pub use documents::{load_documents, split_paragraphs, Document, LoadError};
pub use embedder::{EmbedError, Embedder, EmbedderConfig, EmbeddingService, HashingEmbeddings};
pub use error::ConfigurationError;
pub use http::ServiceError;
pub use memory::MemoryBackend;
pub use metadata::{Metadata, MetadataFilter, MetadataValue};
pub use normalize::{normalize, Match};
pub use pinecone::{PineconeBackend, PineconeConfig};
pub use retriever::{IngestReport, PartialIngestionFailure, Retriever, RetrieverError, MAX_TOP_K};
pub use retry::RetryPolicy;
pub use weaviate::{WeaviateBackend, WeaviateConfig};

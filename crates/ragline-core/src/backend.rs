//! The vector store abstraction shared by every backend.
//!
//! Each backend declares how its native scores read ([`ScoreKind`]) so that
//! ranking code never needs to know which store it is talking to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::http::ServiceError;
use crate::metadata::{Metadata, MetadataFilter};
use crate::retry::Attempted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Managed cloud index.
    Pinecone,
    /// Self-hosted collection service.
    Weaviate,
    /// In-process store.
    Memory,
}

impl BackendKind {
    pub const REMOTE: [BackendKind; 2] = [BackendKind::Pinecone, BackendKind::Weaviate];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Pinecone => "pinecone",
            BackendKind::Weaviate => "weaviate",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown backend {0:?} (expected pinecone, weaviate or memory)")]
pub struct ParseBackendKindError(String);

impl FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(BackendKind::Pinecone),
            "weaviate" => Ok(BackendKind::Weaviate),
            "memory" => Ok(BackendKind::Memory),
            _ => Err(ParseBackendKindError(s.to_string())),
        }
    }
}

/// How a backend's native scores are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    /// Cosine similarity in `[-1, 1]`; higher is better.
    Similarity,
    /// Non-negative distance, unbounded; lower is better.
    Distance,
}

impl ScoreKind {
    pub fn higher_is_better(&self) -> bool {
        matches!(self, ScoreKind::Similarity)
    }
}

/// A record to upsert. `id: None` lets the backend assign one.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: Option<String>,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// A nearest-neighbour hit with the backend's own score.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatch {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedRecord {
    pub id: String,
    pub reason: String,
}

/// Per-record outcome of an upsert. Records in `succeeded` are committed even
/// when others failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedRecord>,
}

impl UpsertReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn fail_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a String>, reason: &str) {
        self.failed.extend(ids.into_iter().map(|id| FailedRecord {
            id: id.clone(),
            reason: reason.to_string(),
        }));
    }
}

/// A live handle to one vector store.
///
/// Handles are used through `&mut self` and are not shared between callers;
/// open one handle per concurrent caller. Once [`close`](VectorBackend::close)
/// has been called every other operation fails with
/// [`BackendError::ClosedHandle`].
pub trait VectorBackend: Send {
    fn kind(&self) -> BackendKind;

    fn score_kind(&self) -> ScoreKind;

    /// Vector length every stored record must have.
    fn dimension(&self) -> usize;

    /// Inserts or overwrites (by id) each record. A failure on one record
    /// does not undo those committed before it.
    fn upsert(&mut self, records: Vec<Record>) -> Result<UpsertReport, BackendError>;

    /// Up to `k` nearest records, best first under [`score_kind`](VectorBackend::score_kind).
    /// A store that does not exist yet answers with no matches.
    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RawMatch>, BackendError>;

    /// Number of stored records.
    fn count(&mut self) -> Result<usize, BackendError>;

    /// Removes every record whose metadata matches `filter`. An empty filter
    /// removes nothing, and neither does a store that does not exist yet.
    fn delete_matching(&mut self, filter: &MetadataFilter) -> Result<(), BackendError>;

    /// Destroys every record (and the index/collection). Idempotent.
    fn delete_all(&mut self) -> Result<(), BackendError>;

    /// Releases the connection. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), BackendError>;

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0} handle is closed")]
    ClosedHandle(BackendKind),
    #[error("{backend} unavailable after {attempts} attempt(s): {reason}")]
    ServiceUnavailable {
        backend: BackendKind,
        attempts: u32,
        reason: String,
    },
    #[error("{backend} rejected credentials: {reason}")]
    Auth { backend: BackendKind, reason: String },
    #[error("{backend} request failed: {reason}")]
    Request { backend: BackendKind, reason: String },
    #[error("{backend} returned an unexpected response: {reason}")]
    Protocol { backend: BackendKind, reason: String },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl BackendError {
    pub(crate) fn from_service(backend: BackendKind, failure: Attempted<ServiceError>) -> Self {
        let reason = failure.error.to_string();
        match failure.error {
            ServiceError::RateLimited(_) | ServiceError::Transient(_) => BackendError::ServiceUnavailable {
                backend,
                attempts: failure.attempts,
                reason,
            },
            ServiceError::Auth(_) => BackendError::Auth { backend, reason },
            ServiceError::Malformed(_) => BackendError::Protocol { backend, reason },
            ServiceError::NotFound(_) | ServiceError::Conflict(_) | ServiceError::Rejected(_) => {
                BackendError::Request { backend, reason }
            }
        }
    }

    pub(crate) fn protocol(backend: BackendKind, reason: impl Into<String>) -> Self {
        BackendError::Protocol {
            backend,
            reason: reason.into(),
        }
    }
}

pub(crate) fn ensure_open(closed: bool, kind: BackendKind) -> Result<(), BackendError> {
    if closed {
        Err(BackendError::ClosedHandle(kind))
    } else {
        Ok(())
    }
}

/// Assigns ids and splits off records whose vector has the wrong length.
pub(crate) fn prepare(records: Vec<Record>, dimension: usize) -> (Vec<(String, Record)>, Vec<FailedRecord>) {
    let mut ready = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        let id = record
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if record.vector.len() != dimension {
            rejected.push(FailedRecord {
                id,
                reason: ConfigurationError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                }
                .to_string(),
            });
        } else if record.text.trim().is_empty() {
            rejected.push(FailedRecord {
                id,
                reason: "record text is blank".to_string(),
            });
        } else {
            ready.push((id, record));
        }
    }
    (ready, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Option<&str>, dim: usize) -> Record {
        Record {
            id: id.map(str::to_string),
            text: "body".into(),
            vector: vec![0.1; dim],
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Pinecone".parse::<BackendKind>(), Ok(BackendKind::Pinecone));
        assert_eq!(" weaviate ".parse::<BackendKind>(), Ok(BackendKind::Weaviate));
        assert_eq!("memory".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert!("chroma".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Weaviate.to_string(), "weaviate");
    }

    #[test]
    fn score_conventions() {
        assert!(ScoreKind::Similarity.higher_is_better());
        assert!(!ScoreKind::Distance.higher_is_better());
    }

    #[test]
    fn prepare_assigns_ids_and_rejects_bad_dimensions() {
        let mut blank = record(Some("e"), 3);
        blank.text = " \n\t".into();
        let (ready, rejected) = prepare(
            vec![record(Some("a"), 3), record(None, 3), record(Some("c"), 2), record(Some(""), 3), blank],
            3,
        );
        assert_eq!(ready.len(), 3);
        assert_eq!(ready[0].0, "a");
        assert!(Uuid::parse_str(&ready[1].0).is_ok());
        assert!(Uuid::parse_str(&ready[2].0).is_ok());
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].id, "c");
        assert!(rejected[0].reason.contains("dimension"));
        assert_eq!(rejected[1].id, "e");
    }

    #[test]
    fn service_failures_map_to_backend_errors() {
        let unavailable = BackendError::from_service(
            BackendKind::Pinecone,
            Attempted { error: ServiceError::Transient("timeout".into()), attempts: 4 },
        );
        assert!(matches!(unavailable, BackendError::ServiceUnavailable { attempts: 4, .. }));
        let auth = BackendError::from_service(
            BackendKind::Weaviate,
            Attempted { error: ServiceError::Auth("401".into()), attempts: 1 },
        );
        assert!(matches!(auth, BackendError::Auth { backend: BackendKind::Weaviate, .. }));
    }

    #[test]
    fn closed_handles_are_rejected() {
        assert!(ensure_open(false, BackendKind::Memory).is_ok());
        assert!(matches!(
            ensure_open(true, BackendKind::Memory),
            Err(BackendError::ClosedHandle(BackendKind::Memory))
        ));
    }
}

//! Ingest and retrieval pipeline: chunk → embed → upsert, and embed → query → rank.
//!
//! The [`Retriever`] owns one embedder and at most one handle per
//! [`BackendKind`]. Nothing here branches on the backend: score direction
//! comes from [`VectorBackend::score_kind`].

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BackendKind, FailedRecord, Record, VectorBackend};
use crate::chunks::{chunk_document, ChunkParams, Segment};
use crate::embedder::{EmbedError, Embedder};
use crate::error::ConfigurationError;
use crate::metadata::{self, Metadata, MetadataFilter, DOCUMENT_ID_KEY, DOCUMENT_INDEX_KEY, SEGMENT_INDEX_KEY};
use crate::normalize::{rank, Match};

/// Upper bound on matches returned by one query; larger requests are clamped.
pub const MAX_TOP_K: usize = 10;

/// Outcome of one ingest call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub documents: usize,
    pub segments: usize,
    /// Segments committed to the backend.
    pub ingested: usize,
    /// Ids of the committed segments.
    pub ids: Vec<String>,
    pub failures: Option<PartialIngestionFailure>,
}

/// Some segments were committed, others were not. Committed ones stay.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{backend}: {count} of {attempted} segment(s) failed to upsert", count = .failed.len())]
pub struct PartialIngestionFailure {
    pub backend: BackendKind,
    pub attempted: usize,
    pub failed: Vec<FailedRecord>,
}

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("no {0} backend is attached")]
    BackendNotAttached(BackendKind),
    #[error("{0} query worker panicked")]
    WorkerPanicked(BackendKind),
}

pub struct Retriever {
    pub(crate) embedder: Embedder,
    chunking: ChunkParams,
    pub(crate) backends: BTreeMap<BackendKind, Box<dyn VectorBackend>>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder)
            .field("chunking", &self.chunking)
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Retriever {
    pub fn new(embedder: Embedder, chunking: ChunkParams) -> Result<Self, RetrieverError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            chunking,
            backends: BTreeMap::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Attached backends, in [`BackendKind`] order.
    pub fn attached(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    /// Attaches a handle, replacing (and closing) any previous one of the same kind.
    pub fn attach(&mut self, backend: Box<dyn VectorBackend>) -> Result<(), RetrieverError> {
        if backend.dimension() != self.embedder.dimension() {
            return Err(ConfigurationError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: backend.dimension(),
            }
            .into());
        }
        let kind = backend.kind();
        if let Some(mut previous) = self.backends.insert(kind, backend) {
            if let Err(e) = previous.close() {
                warn!("closing replaced {kind} handle: {e}");
            }
        }
        debug!("attached {kind} backend");
        Ok(())
    }

    /// Chunks, embeds and upserts `texts`; the backend assigns segment ids.
    /// `metadata`, when given, holds one map per text and is copied onto each
    /// of its segments.
    pub fn add_documents(
        &mut self,
        texts: &[String],
        backend: BackendKind,
        metadata: Option<&[Metadata]>,
    ) -> Result<IngestReport, RetrieverError> {
        self.ingest(texts, None, backend, metadata)
    }

    /// Like [`add_documents`](Self::add_documents) with caller ids. Segment
    /// `n` of document `id` is stored as `{id}#{n}` and tagged with
    /// `document_id`. Re-ingesting a document replaces all of its earlier
    /// segments, including ones past the new segment count.
    pub fn add_documents_with_ids(
        &mut self,
        texts: &[String],
        ids: &[String],
        backend: BackendKind,
        metadata: Option<&[Metadata]>,
    ) -> Result<IngestReport, RetrieverError> {
        if ids.len() != texts.len() {
            return Err(ConfigurationError::IdLength {
                texts: texts.len(),
                ids: ids.len(),
            }
            .into());
        }
        self.ingest(texts, Some(ids), backend, metadata)
    }

    fn ingest(
        &mut self,
        texts: &[String],
        ids: Option<&[String]>,
        kind: BackendKind,
        metadata: Option<&[Metadata]>,
    ) -> Result<IngestReport, RetrieverError> {
        if let Some(metadata) = metadata {
            if metadata.len() != texts.len() {
                return Err(ConfigurationError::MetadataLength {
                    texts: texts.len(),
                    metadata: metadata.len(),
                }
                .into());
            }
            metadata.iter().try_for_each(metadata::validate)?;
        }
        if !self.backends.contains_key(&kind) {
            return Err(RetrieverError::BackendNotAttached(kind));
        }

        let empty = Metadata::new();
        let mut segments: Vec<(Option<String>, Segment)> = Vec::new();
        for (doc_index, text) in texts.iter().enumerate() {
            let tags = metadata.map_or(&empty, |m| &m[doc_index]);
            let source = ids.map_or_else(|| format!("doc-{doc_index}"), |ids| ids[doc_index].clone());
            for mut segment in chunk_document(&source, text, tags, self.chunking)? {
                segment.tags.insert(DOCUMENT_INDEX_KEY.into(), doc_index.into());
                segment.tags.insert(SEGMENT_INDEX_KEY.into(), segment.index.into());
                if ids.is_some() {
                    segment.tags.insert(DOCUMENT_ID_KEY.into(), source.clone().into());
                }
                let id = ids.map(|_| format!("{source}#{}", segment.index));
                segments.push((id, segment));
            }
        }

        let mut report = IngestReport {
            documents: texts.len(),
            segments: segments.len(),
            ..IngestReport::default()
        };
        if segments.is_empty() {
            if let Some(ids) = ids {
                self.remove_documents(kind, ids)?;
            }
            debug!("nothing to ingest: {} document(s) produced no segments", texts.len());
            return Ok(report);
        }

        let bodies: Vec<String> = segments.iter().map(|(_, s)| s.text.clone()).collect();
        let vectors = self.embedder.embed(&bodies)?;
        // Only once the new version is embedded, so a failed embedding keeps the old one.
        if let Some(ids) = ids {
            self.remove_documents(kind, ids)?;
        }
        let records: Vec<Record> = segments
            .into_iter()
            .zip(vectors)
            .map(|((id, segment), vector)| Record {
                id,
                text: segment.text,
                vector,
                metadata: segment.tags,
            })
            .collect();

        let backend = self.backend_mut(kind)?;
        let upserted = backend.upsert(records)?;
        report.ingested = upserted.succeeded.len();
        report.ids = upserted.succeeded;
        if !upserted.failed.is_empty() {
            let failure = PartialIngestionFailure {
                backend: kind,
                attempted: report.segments,
                failed: upserted.failed,
            };
            warn!("partial ingestion: {failure}");
            report.failures = Some(failure);
        }
        info!(
            "ingested {} of {} segment(s) from {} document(s) into {kind}",
            report.ingested, report.segments, report.documents
        );
        Ok(report)
    }

    /// Drops every stored segment of the named documents.
    fn remove_documents(&mut self, kind: BackendKind, ids: &[String]) -> Result<(), RetrieverError> {
        let unique: BTreeSet<&String> = ids.iter().collect();
        let backend = self.backend_mut(kind)?;
        for id in &unique {
            backend.delete_matching(&MetadataFilter::new().eq(DOCUMENT_ID_KEY, id.as_str()))?;
        }
        debug!("cleared earlier segments of {} document(s) in {kind}", unique.len());
        Ok(())
    }

    /// Best `top_k` matches for `query`, highest normalized score first.
    pub fn retrieve(&mut self, query: &str, backend: BackendKind, top_k: usize) -> Result<Vec<Match>, RetrieverError> {
        self.search(query, backend, top_k, None)
    }

    pub fn retrieve_filtered(
        &mut self,
        query: &str,
        backend: BackendKind,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Match>, RetrieverError> {
        filter.validate()?;
        self.search(query, backend, top_k, Some(filter))
    }

    fn search(
        &mut self,
        query: &str,
        kind: BackendKind,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Match>, RetrieverError> {
        let top_k = clamp_top_k(top_k)?;
        if !self.backends.contains_key(&kind) {
            return Err(RetrieverError::BackendNotAttached(kind));
        }
        let vector = self.embedder.embed_one(query)?;
        let matches = query_backend(self.backend_mut(kind)?.as_mut(), &vector, top_k, filter)?;
        info!("{kind} returned {} match(es)", matches.len());
        Ok(matches)
    }

    /// Number of records currently stored in `backend`.
    pub fn count(&mut self, backend: BackendKind) -> Result<usize, RetrieverError> {
        Ok(self.backend_mut(backend)?.count()?)
    }

    /// Destroys every record in `backend`.
    pub fn reset(&mut self, backend: BackendKind) -> Result<(), RetrieverError> {
        self.backend_mut(backend)?.delete_all()?;
        info!("reset {backend}");
        Ok(())
    }

    /// Closes and detaches every backend. Safe to call more than once; the
    /// first close error is returned after all handles have been released.
    pub fn cleanup(&mut self) -> Result<(), RetrieverError> {
        let mut first_error = None;
        for (kind, mut backend) in std::mem::take(&mut self.backends) {
            if let Err(e) = backend.close() {
                warn!("closing {kind}: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn backend_mut(&mut self, kind: BackendKind) -> Result<&mut Box<dyn VectorBackend>, RetrieverError> {
        self.backends
            .get_mut(&kind)
            .ok_or(RetrieverError::BackendNotAttached(kind))
    }
}

impl Drop for Retriever {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

pub(crate) fn clamp_top_k(top_k: usize) -> Result<usize, ConfigurationError> {
    match top_k {
        0 => Err(ConfigurationError::InvalidTopK),
        k if k > MAX_TOP_K => {
            debug!("top_k {k} clamped to {MAX_TOP_K}");
            Ok(MAX_TOP_K)
        }
        k => Ok(k),
    }
}

pub(crate) fn query_backend(
    backend: &mut dyn VectorBackend,
    vector: &[f32],
    top_k: usize,
    filter: Option<&MetadataFilter>,
) -> Result<Vec<Match>, BackendError> {
    let raw = backend.query(vector, top_k, filter)?;
    Ok(rank(backend.score_kind(), raw, top_k))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::backend::{RawMatch, ScoreKind, UpsertReport};
    use crate::embedder::{EmbedderConfig, HashingEmbeddings};
    use crate::memory::MemoryBackend;
    use crate::metadata::MetadataValue;
    use crate::retry::RetryPolicy;

    pub(crate) const DIM: usize = 384;

    pub(crate) fn retriever() -> Retriever {
        retriever_with(ChunkParams::default())
    }

    fn retriever_with(chunking: ChunkParams) -> Retriever {
        let embedder = Embedder::new(
            Box::new(HashingEmbeddings::new(DIM)),
            EmbedderConfig {
                dimension: Some(DIM),
                retry: RetryPolicy::none(),
                ..EmbedderConfig::default()
            },
        )
        .unwrap();
        Retriever::new(embedder, chunking).unwrap()
    }

    pub(crate) fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    /// A backend that refuses every call, as an unreachable service would.
    #[derive(Debug)]
    pub(crate) struct DownBackend {
        pub kind: BackendKind,
        pub closes: Arc<Mutex<usize>>,
    }

    impl DownBackend {
        pub fn new(kind: BackendKind) -> Self {
            Self {
                kind,
                closes: Arc::default(),
            }
        }

        fn unavailable(&self) -> BackendError {
            BackendError::ServiceUnavailable {
                backend: self.kind,
                attempts: 3,
                reason: "connection refused".into(),
            }
        }
    }

    impl VectorBackend for DownBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }
        fn score_kind(&self) -> ScoreKind {
            ScoreKind::Distance
        }
        fn dimension(&self) -> usize {
            DIM
        }
        fn upsert(&mut self, _: Vec<Record>) -> Result<UpsertReport, BackendError> {
            Err(self.unavailable())
        }
        fn query(&mut self, _: &[f32], _: usize, _: Option<&MetadataFilter>) -> Result<Vec<RawMatch>, BackendError> {
            Err(self.unavailable())
        }
        fn count(&mut self) -> Result<usize, BackendError> {
            Err(self.unavailable())
        }
        fn delete_matching(&mut self, _: &MetadataFilter) -> Result<(), BackendError> {
            Err(self.unavailable())
        }
        fn delete_all(&mut self) -> Result<(), BackendError> {
            Err(self.unavailable())
        }
        fn close(&mut self) -> Result<(), BackendError> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn python_question_finds_python_document() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let texts = strings(&[
            "Python is a programming language.",
            "Weaviate and Pinecone are vector databases.",
        ]);
        let report = r.add_documents(&texts, BackendKind::Memory, None).unwrap();
        assert_eq!((report.documents, report.segments, report.ingested), (2, 2, 2));
        assert!(report.failures.is_none());

        let hits = r.retrieve("What is Python?", BackendKind::Memory, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Python is a programming language.");
    }

    #[test]
    fn results_are_bounded_and_descending() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM).with_score_kind(ScoreKind::Distance)))
            .unwrap();
        let texts: Vec<String> = (0..15).map(|i| format!("note {i} about topic {}", i % 4)).collect();
        r.add_documents(&texts, BackendKind::Memory, None).unwrap();

        let hits = r.retrieve("topic 2", BackendKind::Memory, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|m| (0.0..=1.0).contains(&m.score)));

        let clamped = r.retrieve("topic 2", BackendKind::Memory, 50).unwrap();
        assert_eq!(clamped.len(), MAX_TOP_K);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        assert!(matches!(
            r.retrieve("anything", BackendKind::Memory, 0),
            Err(RetrieverError::Configuration(ConfigurationError::InvalidTopK))
        ));
    }

    #[test]
    fn empty_store_returns_nothing() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        assert!(r.retrieve("anything", BackendKind::Memory, 5).unwrap().is_empty());
    }

    #[test]
    fn reingesting_same_id_keeps_one_record() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let ids = strings(&["guide"]);
        r.add_documents_with_ids(&strings(&["first draft"]), &ids, BackendKind::Memory, None)
            .unwrap();
        let report = r
            .add_documents_with_ids(&strings(&["final version"]), &ids, BackendKind::Memory, None)
            .unwrap();
        assert_eq!(report.ids, ["guide#0"]);
        assert_eq!(r.count(BackendKind::Memory).unwrap(), 1);
        let hits = r.retrieve("version", BackendKind::Memory, 5).unwrap();
        assert_eq!(hits[0].text, "final version");
    }

    #[test]
    fn reingesting_shorter_document_drops_stale_segments() {
        let mut r = retriever_with(ChunkParams::new(40, 0).unwrap());
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let ids = strings(&["guide", "other"]);
        let first = strings(&[
            "Intro paragraph about guides.\n\nMiddle part on setup steps.\n\nObsolete paragraph about zebras.",
            "Unrelated notes on gardening.",
        ]);
        let report = r.add_documents_with_ids(&first, &ids, BackendKind::Memory, None).unwrap();
        assert_eq!(report.segments, 4);

        let report = r
            .add_documents_with_ids(&strings(&["final version"]), &ids[..1], BackendKind::Memory, None)
            .unwrap();
        assert_eq!(report.ids, ["guide#0"]);
        assert_eq!(r.count(BackendKind::Memory).unwrap(), 2);
        let hits = r.retrieve("zebras", BackendKind::Memory, 5).unwrap();
        let ids: Vec<_> = hits.iter().map(|m| m.id.as_str()).collect();
        assert!(!ids.contains(&"guide#2"), "stale segment still stored: {ids:?}");
        assert!(ids.contains(&"other#0"));
        let kept = hits.iter().find(|m| m.id == "guide#0").unwrap();
        assert_eq!(kept.metadata[DOCUMENT_ID_KEY], MetadataValue::from("guide"));
    }

    #[test]
    fn reingesting_as_blank_removes_the_document() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let ids = strings(&["draft"]);
        r.add_documents_with_ids(&strings(&["some words"]), &ids, BackendKind::Memory, None)
            .unwrap();
        let report = r
            .add_documents_with_ids(&strings(&["  \n"]), &ids, BackendKind::Memory, None)
            .unwrap();
        assert_eq!(report.segments, 0);
        assert_eq!(r.count(BackendKind::Memory).unwrap(), 0);
    }

    #[test]
    fn documents_without_ids_are_never_replaced() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        r.add_documents(&strings(&["same text"]), BackendKind::Memory, None).unwrap();
        r.add_documents(&strings(&["same text"]), BackendKind::Memory, None).unwrap();
        assert_eq!(r.count(BackendKind::Memory).unwrap(), 2);
        let hits = r.retrieve("same text", BackendKind::Memory, 1).unwrap();
        assert!(!hits[0].metadata.contains_key(DOCUMENT_ID_KEY));
    }

    #[test]
    fn metadata_is_carried_onto_segments() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let tags: Metadata = [("lang".to_string(), MetadataValue::from("rust"))].into_iter().collect();
        r.add_documents(
            &strings(&["Ownership and borrowing.", "Garbage collection."]),
            BackendKind::Memory,
            Some(&[tags, Metadata::new()]),
        )
        .unwrap();

        let filter = MetadataFilter::new().eq("lang", "rust");
        let hits = r
            .retrieve_filtered("collection", BackendKind::Memory, 5, &filter)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["lang"], MetadataValue::from("rust"));
        assert_eq!(hits[0].metadata[SEGMENT_INDEX_KEY], MetadataValue::Integer(0));
        assert_eq!(hits[0].metadata[DOCUMENT_INDEX_KEY], MetadataValue::Integer(0));
    }

    #[test]
    fn mismatched_metadata_length_is_rejected_before_upsert() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let err = r
            .add_documents(&strings(&["a", "b"]), BackendKind::Memory, Some(&[Metadata::new()]))
            .unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::Configuration(ConfigurationError::MetadataLength { texts: 2, metadata: 1 })
        ));
        assert_eq!(r.count(BackendKind::Memory).unwrap(), 0);
    }

    #[test]
    fn reserved_metadata_key_is_rejected() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let bad: Metadata = [("text".to_string(), MetadataValue::from("x"))].into_iter().collect();
        assert!(matches!(
            r.add_documents(&strings(&["a"]), BackendKind::Memory, Some(&[bad])),
            Err(RetrieverError::Configuration(ConfigurationError::ReservedMetadataKey(_)))
        ));
    }

    #[test]
    fn long_documents_are_split_before_embedding() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let long = "A sentence that repeats itself. ".repeat(60);
        let report = r.add_documents(&[long], BackendKind::Memory, None).unwrap();
        assert!(report.segments > 1);
        assert_eq!(report.ingested, report.segments);
        assert_eq!(r.count(BackendKind::Memory).unwrap(), report.segments);
    }

    #[test]
    fn blank_documents_produce_nothing() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        let report = r.add_documents(&strings(&["", "   \n"]), BackendKind::Memory, None).unwrap();
        assert_eq!((report.documents, report.segments, report.ingested), (2, 0, 0));
    }

    #[test]
    fn reset_backend_queries_empty() {
        let mut r = retriever();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        r.add_documents(&strings(&["something to forget"]), BackendKind::Memory, None)
            .unwrap();
        r.reset(BackendKind::Memory).unwrap();
        assert!(r.retrieve("forget", BackendKind::Memory, 3).unwrap().is_empty());
    }

    #[test]
    fn unattached_backend_is_reported() {
        let mut r = retriever();
        assert!(matches!(
            r.retrieve("q", BackendKind::Pinecone, 1),
            Err(RetrieverError::BackendNotAttached(BackendKind::Pinecone))
        ));
        assert!(matches!(
            r.add_documents(&strings(&["a"]), BackendKind::Weaviate, None),
            Err(RetrieverError::BackendNotAttached(BackendKind::Weaviate))
        ));
    }

    #[test]
    fn attach_checks_dimension() {
        let mut r = retriever();
        assert!(matches!(
            r.attach(Box::new(MemoryBackend::new(DIM + 1))),
            Err(RetrieverError::Configuration(ConfigurationError::DimensionMismatch { .. }))
        ));
        assert!(r.attached().is_empty());
    }

    #[test]
    fn backend_failure_during_ingest_is_an_error() {
        let mut r = retriever();
        r.attach(Box::new(DownBackend::new(BackendKind::Weaviate))).unwrap();
        assert!(matches!(
            r.add_documents(&strings(&["text"]), BackendKind::Weaviate, None),
            Err(RetrieverError::Backend(BackendError::ServiceUnavailable { .. }))
        ));
    }

    #[test]
    fn cleanup_closes_every_handle_once() {
        let mut r = retriever();
        let down = DownBackend::new(BackendKind::Pinecone);
        let closes = Arc::clone(&down.closes);
        r.attach(Box::new(down)).unwrap();
        r.attach(Box::new(MemoryBackend::new(DIM))).unwrap();
        r.cleanup().unwrap();
        r.cleanup().unwrap();
        assert!(r.attached().is_empty());
        assert_eq!(*closes.lock().unwrap(), 1);
        drop(r);
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[test]
    fn replacing_a_backend_closes_the_old_handle() {
        let mut r = retriever();
        let first = DownBackend::new(BackendKind::Weaviate);
        let closes = Arc::clone(&first.closes);
        r.attach(Box::new(first)).unwrap();
        r.attach(Box::new(MemoryBackend::new(DIM).as_kind(BackendKind::Weaviate)))
            .unwrap();
        assert_eq!(*closes.lock().unwrap(), 1);
        assert_eq!(r.attached(), [BackendKind::Weaviate]);
    }
}

//! In-memory vector store. Supports upsert and cosine similarity search.
//! No persistence; the store is discarded when the handle is dropped.
//!
//! Used for offline runs and tests. It can report either convention so that
//! both normalization paths are exercised without a remote service.

use crate::backend::{
    ensure_open, prepare, BackendError, BackendKind, RawMatch, Record, ScoreKind, UpsertReport, VectorBackend,
};
use crate::metadata::{Metadata, MetadataFilter};

/// A record with its embedding, stored for similarity search.
#[derive(Debug, Clone)]
struct StoredRecord {
    id: String,
    text: String,
    metadata: Metadata,
    /// Normalized embedding vector (unit length for cosine similarity via dot product).
    embedding: Vec<f32>,
}

/// Holds records in insertion order, which is also the tie-break order for
/// equal scores.
#[derive(Debug)]
pub struct MemoryBackend {
    items: Vec<StoredRecord>,
    dimension: usize,
    kind: BackendKind,
    score_kind: ScoreKind,
    closed: bool,
}

impl MemoryBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            items: Vec::new(),
            dimension,
            kind: BackendKind::Memory,
            score_kind: ScoreKind::Similarity,
            closed: false,
        }
    }

    /// Report cosine distance (`1 - similarity`) instead of similarity.
    pub fn with_score_kind(mut self, score_kind: ScoreKind) -> Self {
        self.score_kind = score_kind;
        self
    }

    /// Registers the store under another kind, so an offline run can stand
    /// in for a remote backend.
    pub fn as_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl VectorBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn score_kind(&self) -> ScoreKind {
        self.score_kind
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Overwrites keep the record's original position.
    fn upsert(&mut self, records: Vec<Record>) -> Result<UpsertReport, BackendError> {
        ensure_open(self.closed, self.kind())?;
        let (ready, failed) = prepare(records, self.dimension);
        let mut report = UpsertReport {
            succeeded: Vec::with_capacity(ready.len()),
            failed,
        };
        for (id, record) in ready {
            let stored = StoredRecord {
                id: id.clone(),
                text: record.text,
                metadata: record.metadata,
                embedding: normalize(&record.vector),
            };
            match self.items.iter_mut().find(|item| item.id == id) {
                Some(existing) => *existing = stored,
                None => self.items.push(stored),
            }
            report.succeeded.push(id);
        }
        Ok(report)
    }

    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RawMatch>, BackendError> {
        ensure_open(self.closed, self.kind())?;
        if self.items.is_empty() || vector.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let q_norm = normalize(vector);
        let mut scored: Vec<(&StoredRecord, f32)> = self
            .items
            .iter()
            .filter(|item| filter.map_or(true, |f| f.matches(&item.metadata)))
            .map(|item| (item, dot(&q_norm, &item.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(item, sim)| RawMatch {
                id: item.id.clone(),
                text: item.text.clone(),
                score: match self.score_kind {
                    ScoreKind::Similarity => sim,
                    ScoreKind::Distance => 1.0 - sim,
                },
                metadata: item.metadata.clone(),
            })
            .collect())
    }

    fn count(&mut self) -> Result<usize, BackendError> {
        ensure_open(self.closed, self.kind())?;
        Ok(self.items.len())
    }

    fn delete_matching(&mut self, filter: &MetadataFilter) -> Result<(), BackendError> {
        ensure_open(self.closed, self.kind())?;
        if !filter.is_empty() {
            self.items.retain(|item| !filter.matches(&item.metadata));
        }
        Ok(())
    }

    fn delete_all(&mut self) -> Result<(), BackendError> {
        ensure_open(self.closed, self.kind())?;
        self.items.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        self.items = Vec::new();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;

    fn rec(id: Option<&str>, text: &str, vector: Vec<f32>) -> Record {
        Record {
            id: id.map(str::to_string),
            text: text.to_string(),
            vector,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn query_ranks_by_cosine() {
        let mut store = MemoryBackend::new(2);
        store
            .upsert(vec![
                rec(Some("x"), "east", vec![1.0, 0.0]),
                rec(Some("y"), "north", vec![0.0, 1.0]),
                rec(Some("xy"), "north-east", vec![1.0, 1.0]),
            ])
            .unwrap();
        let hits = store.query(&[2.0, 0.1], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "east");
        assert_eq!(hits[1].text, "north-east");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn distance_mode_orders_ascending() {
        let mut store = MemoryBackend::new(2).with_score_kind(ScoreKind::Distance);
        store
            .upsert(vec![rec(None, "far", vec![-1.0, 0.0]), rec(None, "near", vec![1.0, 0.0])])
            .unwrap();
        let hits = store.query(&[1.0, 0.0], 5, None).unwrap();
        assert_eq!(hits[0].text, "near");
        assert!(hits[0].score.abs() < 1e-6);
        assert!((hits[1].score - 2.0).abs() < 1e-6);
    }

    #[test]
    fn same_id_overwrites() {
        let mut store = MemoryBackend::new(2);
        store.upsert(vec![rec(Some("doc"), "old", vec![1.0, 0.0])]).unwrap();
        store.upsert(vec![rec(Some("doc"), "new", vec![1.0, 0.0])]).unwrap();
        assert_eq!(store.len(), 1);
        let hits = store.query(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].id.as_str(), hits[0].text.as_str()), ("doc", "new"));
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let mut store = MemoryBackend::new(2);
        store
            .upsert(vec![
                rec(Some("first"), "a", vec![1.0, 0.0]),
                rec(Some("second"), "b", vec![1.0, 0.0]),
                rec(Some("third"), "c", vec![1.0, 0.0]),
            ])
            .unwrap();
        let ids: Vec<_> = store.query(&[1.0, 0.0], 3, None).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["first", "second", "third"]);
    }

    #[test]
    fn wrong_dimension_fails_only_that_record() {
        let mut store = MemoryBackend::new(2);
        let report = store
            .upsert(vec![rec(Some("ok"), "a", vec![1.0, 0.0]), rec(Some("bad"), "b", vec![1.0])])
            .unwrap();
        assert_eq!(report.succeeded, ["ok"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "bad");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn filter_restricts_matches() {
        let mut store = MemoryBackend::new(2);
        let mut tagged = rec(Some("t"), "tagged", vec![0.0, 1.0]);
        tagged.metadata.insert("lang".into(), MetadataValue::from("rust"));
        store.upsert(vec![rec(Some("u"), "untagged", vec![1.0, 0.0]), tagged]).unwrap();
        let filter = MetadataFilter::new().eq("lang", "rust");
        let hits = store.query(&[1.0, 0.0], 5, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t");
    }

    #[test]
    fn delete_matching_removes_only_matches() {
        let mut store = MemoryBackend::new(2);
        let mut old = rec(Some("guide#1"), "old tail", vec![0.0, 1.0]);
        old.metadata.insert("document_id".into(), MetadataValue::from("guide"));
        let mut other = rec(Some("other#0"), "other", vec![1.0, 0.0]);
        other.metadata.insert("document_id".into(), MetadataValue::from("other"));
        store.upsert(vec![old, other]).unwrap();

        store.delete_matching(&MetadataFilter::new()).unwrap();
        assert_eq!(store.len(), 2);
        store
            .delete_matching(&MetadataFilter::new().eq("document_id", "guide"))
            .unwrap();
        let ids: Vec<_> = store.query(&[1.0, 1.0], 5, None).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["other#0"]);
    }

    #[test]
    fn delete_all_is_idempotent_and_empties() {
        let mut store = MemoryBackend::new(2);
        store.upsert(vec![rec(None, "a", vec![1.0, 0.0])]).unwrap();
        store.delete_all().unwrap();
        store.delete_all().unwrap();
        assert!(store.query(&[1.0, 0.0], 3, None).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn closed_handle_rejects_operations() {
        let mut store = MemoryBackend::new(2);
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.query(&[1.0, 0.0], 1, None), Err(BackendError::ClosedHandle(_))));
        assert!(matches!(store.upsert(Vec::new()), Err(BackendError::ClosedHandle(_))));
        assert!(matches!(store.count(), Err(BackendError::ClosedHandle(_))));
        assert!(matches!(store.delete_all(), Err(BackendError::ClosedHandle(_))));
        assert!(matches!(
            store.delete_matching(&MetadataFilter::new().eq("a", 1i64)),
            Err(BackendError::ClosedHandle(_))
        ));
    }
}

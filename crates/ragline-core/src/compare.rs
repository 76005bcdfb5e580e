//! Side-by-side retrieval across backends.
//!
//! The query is embedded once; each backend is then queried on its own
//! scoped thread, with exclusive access to its handle. One slow or failing
//! backend only affects its own slot.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

use crate::backend::BackendKind;
use crate::normalize::Match;
use crate::retriever::{clamp_top_k, query_backend, Retriever, RetrieverError};

/// Why one backend's slot in a [`Comparison`] holds no matches.
#[derive(Debug, Error)]
#[error("{backend}: {error}")]
pub struct BackendQueryFailure {
    pub backend: BackendKind,
    #[source]
    pub error: RetrieverError,
}

#[derive(Debug)]
pub struct Comparison {
    pub query: String,
    pub top_k: usize,
    /// One entry per requested backend.
    pub results: BTreeMap<BackendKind, Result<Vec<Match>, BackendQueryFailure>>,
}

impl Comparison {
    pub fn matches(&self, backend: BackendKind) -> Option<&[Match]> {
        match self.results.get(&backend) {
            Some(Ok(matches)) => Some(matches),
            _ => None,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BackendQueryFailure> {
        self.results.values().filter_map(|r| r.as_ref().err())
    }
}

impl Retriever {
    /// Runs `query` against each of `backends` (all attached ones when empty)
    /// and collects normalized results per backend.
    ///
    /// Only an invalid `top_k` or a failure to embed the query fails the whole
    /// call; backend errors and missing backends are reported in their slot.
    pub fn compare(
        &mut self,
        query: &str,
        backends: &[BackendKind],
        top_k: usize,
    ) -> Result<Comparison, RetrieverError> {
        let top_k = clamp_top_k(top_k)?;
        let wanted: BTreeSet<BackendKind> = if backends.is_empty() {
            self.backends.keys().copied().collect()
        } else {
            backends.iter().copied().collect()
        };
        let vector = self.embedder.embed_one(query)?;
        let vector = vector.as_slice();

        let mut results = BTreeMap::new();
        for &kind in wanted.iter().filter(|k| !self.backends.contains_key(*k)) {
            results.insert(
                kind,
                Err(BackendQueryFailure {
                    backend: kind,
                    error: RetrieverError::BackendNotAttached(kind),
                }),
            );
        }

        let answered = thread::scope(|scope| {
            let workers: Vec<_> = self
                .backends
                .iter_mut()
                .filter(|(kind, _)| wanted.contains(*kind))
                .map(|(&kind, backend)| {
                    let worker = scope.spawn(move || query_backend(backend.as_mut(), vector, top_k, None));
                    (kind, worker)
                })
                .collect();
            workers
                .into_iter()
                .map(|(kind, worker)| {
                    let outcome = match worker.join() {
                        Ok(Ok(matches)) => Ok(matches),
                        Ok(Err(e)) => Err(RetrieverError::Backend(e)),
                        Err(_) => Err(RetrieverError::WorkerPanicked(kind)),
                    };
                    (kind, outcome.map_err(|error| BackendQueryFailure { backend: kind, error }))
                })
                .collect::<Vec<_>>()
        });
        results.extend(answered);

        for failure in results.values().filter_map(|r| r.as_ref().err()) {
            warn!("comparison slot failed: {failure}");
        }
        info!(
            "compared {} backend(s), {} answered",
            results.len(),
            results.values().filter(|r| r.is_ok()).count()
        );
        Ok(Comparison {
            query: query.to_string(),
            top_k,
            results,
        })
    }
}

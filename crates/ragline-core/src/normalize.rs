//! Maps each backend's native score onto one comparable scale.
//!
//! Normalized scores live in `[0, 1]`, 1.0 being the best possible match,
//! whatever convention the backend reports in.

use serde::Serialize;

use crate::backend::{RawMatch, ScoreKind};
use crate::metadata::Metadata;

/// A retrieval hit with its normalized score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Monotonic in the backend's sense of "better". NaN maps to 0.0. Distances
/// stay inside `(0, 1]`, an infinite one included.
pub fn normalize(kind: ScoreKind, native: f32) -> f32 {
    if native.is_nan() {
        return 0.0;
    }
    match kind {
        ScoreKind::Similarity => ((native + 1.0) / 2.0).clamp(0.0, 1.0),
        ScoreKind::Distance => (1.0 / (1.0 + native.max(0.0))).max(f32::MIN_POSITIVE),
    }
}

/// Normalizes, sorts descending and keeps the best `top_k`. The sort is
/// stable so equal scores keep the backend's order.
pub fn rank(kind: ScoreKind, raw: Vec<RawMatch>, top_k: usize) -> Vec<Match> {
    let mut matches: Vec<Match> = raw
        .into_iter()
        .map(|m| Match {
            score: normalize(kind, m.score),
            id: m.id,
            text: m.text,
            metadata: m.metadata,
        })
        .collect();
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(top_k);
    matches
}

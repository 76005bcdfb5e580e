//! Flat key/value metadata attached to stored records, and equality filters over it.
//!
//! Both remote stores accept nested structures in different shapes, so the
//! portable contract is deliberately flat: scalar values under identifier keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;

/// Keys the stores use for their own bookkeeping.
pub const RESERVED_KEYS: [&str; 5] = ["id", "text", "vector", "metadata_json", "record_id"];

/// Metadata keys added to every ingested segment.
pub const SEGMENT_INDEX_KEY: &str = "segment_index";
pub const DOCUMENT_INDEX_KEY: &str = "document_index";
/// Added when the caller names its documents; re-ingesting replaces by it.
pub const DOCUMENT_ID_KEY: &str = "document_id";

pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    pub fn to_json(&self) -> Value {
        match self {
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Integer(i) => Value::from(*i),
            MetadataValue::Float(f) => Value::from(*f),
            MetadataValue::String(s) => Value::String(s.clone()),
        }
    }

    /// Scalars only; arrays, objects and null have no portable form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(MetadataValue::Integer)
                .or_else(|| n.as_f64().map(MetadataValue::Float)),
            Value::String(s) => Some(MetadataValue::String(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        MetadataValue::Integer(i as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Checks that a key is usable as-is by every store (Weaviate property
/// names, Pinecone metadata fields).
pub fn validate_key(key: &str) -> Result<(), ConfigurationError> {
    if RESERVED_KEYS.contains(&key) {
        return Err(ConfigurationError::ReservedMetadataKey(key.to_string()));
    }
    let mut chars = key.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigurationError::InvalidMetadataKey(key.to_string()));
    }
    Ok(())
}

pub fn validate(metadata: &Metadata) -> Result<(), ConfigurationError> {
    metadata.keys().try_for_each(|k| validate_key(k))
}

pub fn to_json_object(metadata: &Metadata) -> serde_json::Map<String, Value> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// Reads back metadata serialized under `metadata_json`; falls back to the
/// scalar fields of `object` when the blob is missing or unreadable.
pub fn from_stored(blob: Option<&str>, object: &serde_json::Map<String, Value>) -> Metadata {
    if let Some(parsed) = blob.and_then(|s| serde_json::from_str::<Metadata>(s).ok()) {
        return parsed;
    }
    object
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .filter_map(|(k, v)| MetadataValue::from_json(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Conjunction of `key == value` clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    clauses: Vec<(String, MetadataValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.clauses.push((key.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, MetadataValue)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.clauses.iter().try_for_each(|(k, _)| validate_key(k))
    }

    /// Integers and floats compare numerically, since a store may hand an
    /// integer back as a float.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses.iter().all(|(key, want)| match (metadata.get(key), want) {
            (Some(MetadataValue::Integer(a)), MetadataValue::Float(b))
            | (Some(MetadataValue::Float(b)), MetadataValue::Integer(a)) => (*a as f64) == *b,
            (Some(have), want) => have == want,
            (None, _) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_must_be_portable_identifiers() {
        assert!(validate_key("category").is_ok());
        assert!(validate_key("_private2").is_ok());
        assert!(validate_key("doc_id").is_ok());
        assert_eq!(
            validate_key("Category"),
            Err(ConfigurationError::InvalidMetadataKey("Category".into()))
        );
        assert!(validate_key("with-dash").is_err());
        assert!(validate_key("").is_err());
        assert_eq!(
            validate_key("text"),
            Err(ConfigurationError::ReservedMetadataKey("text".into()))
        );
    }

    #[test]
    fn json_scalars_round_trip_types() {
        let v: Metadata = serde_json::from_str(r#"{"a":1,"b":1.5,"c":true,"d":"x"}"#).unwrap();
        assert_eq!(v["a"], MetadataValue::Integer(1));
        assert_eq!(v["b"], MetadataValue::Float(1.5));
        assert_eq!(v["c"], MetadataValue::Bool(true));
        assert_eq!(v["d"], MetadataValue::String("x".into()));
        assert_eq!(MetadataValue::from_json(&serde_json::json!([1])), None);
    }

    #[test]
    fn stored_blob_wins_over_fields() {
        let mut object = serde_json::Map::new();
        object.insert("paragraph".into(), serde_json::json!(3.0));
        object.insert("text".into(), serde_json::json!("body"));
        let from_fields = from_stored(None, &object);
        assert_eq!(from_fields.len(), 1);
        assert_eq!(from_fields["paragraph"], MetadataValue::Float(3.0));

        let blob = r#"{"paragraph":3}"#;
        assert_eq!(from_stored(Some(blob), &object)["paragraph"], MetadataValue::Integer(3));
    }

    #[test]
    fn filter_matches_all_clauses() {
        let mut m = Metadata::new();
        m.insert("category".into(), "programming".into());
        m.insert("doc_id".into(), MetadataValue::Integer(2));
        let f = MetadataFilter::new().eq("category", "programming").eq("doc_id", 2.0);
        assert!(f.matches(&m));
        assert!(!MetadataFilter::new().eq("category", "web").matches(&m));
        assert!(!MetadataFilter::new().eq("missing", true).matches(&m));
        assert!(MetadataFilter::new().matches(&m));
    }
}

//! Weaviate (self-hosted collection) backend over REST and GraphQL.
//!
//! Vectors are supplied by us (`vectorizer: none`) and the collection uses
//! cosine distance, so native scores are distances in `[0, 2]`, lower is
//! better. Weaviate needs UUID object ids: caller ids are mapped to UUID v5
//! so that re-upserting the same id overwrites, and the caller's id is kept
//! in the `record_id` property.
//!
//! Metadata keys are declared as properties before first use, strings with
//! `field` tokenization, so equality filters match whole values the way the
//! other stores do.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::backend::{
    ensure_open, prepare, BackendError, BackendKind, RawMatch, Record, ScoreKind, UpsertReport, VectorBackend,
};
use crate::error::ConfigurationError;
use crate::http::{self, ServiceError};
use crate::metadata::{self, Metadata, MetadataFilter, MetadataValue};
use crate::retry::{Attempted, RetryPolicy};

pub const DEFAULT_URL: &str = "http://localhost:8080";
pub const DEFAULT_CLASS: &str = "RAGDocument";
pub const DEFAULT_BATCH: usize = 100;

const KIND: BackendKind = BackendKind::Weaviate;

/// Properties every collection is created with.
const BASE_PROPERTIES: [&str; 3] = ["text", "record_id", "metadata_json"];

/// Namespace for deriving object UUIDs from caller ids.
const ID_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a1e_8d4b_4c7e_9a61_3b2d_7e4f_1c90);

#[derive(Debug, Clone)]
pub struct WeaviateConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Collection (class) name; Weaviate requires it to start uppercase.
    pub class_name: String,
    pub dimension: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub batch_size: usize,
}

impl WeaviateConfig {
    pub fn new(url: impl Into<String>, dimension: usize) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            class_name: DEFAULT_CLASS.to_string(),
            dimension,
            timeout: http::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|k: &String| !k.is_empty());
        self
    }
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    result: Option<BatchResult>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<BatchErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug)]
pub struct WeaviateBackend {
    /// `None` once closed.
    client: Option<Client>,
    base: Url,
    config: WeaviateConfig,
    /// Set once the collection is known to exist; cleared on delete.
    class_ready: bool,
    /// Property names the collection is known to have.
    properties: BTreeSet<String>,
}

impl WeaviateBackend {
    /// Connects and checks reachability and credentials via `/v1/meta`.
    pub fn open(config: WeaviateConfig) -> Result<Self, BackendError> {
        if config.dimension == 0 {
            return Err(ConfigurationError::ZeroDimension.into());
        }
        if config.batch_size == 0 {
            return Err(ConfigurationError::InvalidBatchSize.into());
        }
        validate_class_name(&config.class_name)?;
        let base = parse_base(&config.url)?;
        let client = http::build_client(config.timeout, default_headers(config.api_key.as_deref())?)
            .map_err(|e| BackendError::Request { backend: KIND, reason: e.to_string() })?;
        let meta_url = base.join("v1/meta").map_err(|e| ConfigurationError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        let meta: Value = http::execute_json(&config.retry, "Weaviate handshake", || client.get(meta_url.clone()))
            .map_err(|f| BackendError::from_service(KIND, f))?;
        let version = server_version(&meta);
        info!("connected to Weaviate {version} at {base}");
        Ok(Self {
            client: Some(client),
            base,
            config,
            class_ready: false,
            properties: BTreeSet::new(),
        })
    }

    fn client(&self) -> Result<&Client, BackendError> {
        self.client.as_ref().ok_or(BackendError::ClosedHandle(KIND))
    }

    /// `path` is relative and built from a validated class name.
    fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }

    fn schema_path(&self) -> String {
        format!("v1/schema/{}", self.config.class_name)
    }

    /// Property names of the collection, or `None` when it does not exist.
    fn fetch_properties(&self) -> Result<Option<BTreeSet<String>>, BackendError> {
        let client = self.client()?;
        let url = self.url(&self.schema_path());
        match http::execute_json::<Value>(&self.config.retry, "Weaviate schema probe", || client.get(url.clone())) {
            Ok(schema) => Ok(Some(schema_properties(&schema))),
            Err(Attempted { error: ServiceError::NotFound(_), .. }) => Ok(None),
            Err(failure) => Err(BackendError::from_service(KIND, failure)),
        }
    }

    /// Probes the collection; Weaviate errors on operations against a missing one.
    fn class_exists(&mut self) -> Result<bool, BackendError> {
        if self.class_ready {
            return Ok(true);
        }
        match self.fetch_properties()? {
            Some(properties) => {
                self.properties = properties;
                self.class_ready = true;
            }
            None => self.properties.clear(),
        }
        Ok(self.class_ready)
    }

    fn ensure_class(&mut self) -> Result<(), BackendError> {
        if self.class_exists()? {
            return Ok(());
        }
        let client = self.client()?;
        let url = self.url("v1/schema");
        let body = class_body(&self.config.class_name);
        match http::execute(&self.config.retry, "Weaviate create collection", || {
            client.post(url.clone()).json(&body)
        }) {
            Ok(_) => {
                info!("created Weaviate collection {}", self.config.class_name);
                self.properties = BASE_PROPERTIES.iter().map(|p| p.to_string()).collect();
            }
            Err(Attempted { error: ServiceError::Rejected(msg), .. }) if msg.contains("already exists") => {
                debug!("Weaviate collection {} already exists", self.config.class_name);
                self.properties = self.fetch_properties()?.unwrap_or_default();
            }
            Err(failure) => return Err(BackendError::from_service(KIND, failure)),
        }
        self.class_ready = true;
        Ok(())
    }

    /// Declares metadata keys the collection has not seen yet, so that
    /// auto-schema never picks their type or tokenization.
    fn ensure_properties<'a>(
        &mut self,
        metadata: impl IntoIterator<Item = &'a Metadata>,
    ) -> Result<(), BackendError> {
        let missing = unseen_properties(metadata, &self.properties);
        if missing.is_empty() {
            return Ok(());
        }
        let client = self.client()?;
        let url = self.url(&format!("{}/properties", self.schema_path()));
        for (name, sample) in &missing {
            let body = property_body(name, sample);
            match http::execute(&self.config.retry, "Weaviate add property", || {
                client.post(url.clone()).json(&body)
            }) {
                Ok(_) => debug!("declared Weaviate property {name}"),
                Err(Attempted { error: ServiceError::Rejected(msg), .. }) if msg.contains("already exists") => {}
                Err(failure) => return Err(BackendError::from_service(KIND, failure)),
            }
        }
        self.properties.extend(missing.into_keys());
        Ok(())
    }

    /// Whether every filtered key is a property. Re-reads the schema once
    /// before answering no, since another writer may have added it.
    fn knows_keys(&mut self, filter: &MetadataFilter) -> Result<bool, BackendError> {
        if filter_is_known(filter, &self.properties) {
            return Ok(true);
        }
        if let Some(properties) = self.fetch_properties()? {
            self.properties = properties;
        }
        Ok(filter_is_known(filter, &self.properties))
    }

    fn graphql(&self, query: String, what: &str) -> Result<Value, BackendError> {
        let client = self.client()?;
        let url = self.url("v1/graphql");
        let body = json!({ "query": query });
        let response: GraphQlResponse = http::execute_json(&self.config.retry, what, || {
            client.post(url.clone()).json(&body)
        })
        .map_err(|f| BackendError::from_service(KIND, f))?;
        if let Some(err) = response.errors.first() {
            return Err(BackendError::Request {
                backend: KIND,
                reason: err.message.clone(),
            });
        }
        response
            .data
            .ok_or_else(|| BackendError::protocol(KIND, "GraphQL response without data"))
    }
}

impl VectorBackend for WeaviateBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Distance
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Batch upsert; Weaviate reports errors per object, which map onto
    /// per-record failures.
    fn upsert(&mut self, records: Vec<Record>) -> Result<UpsertReport, BackendError> {
        ensure_open(self.client.is_none(), KIND)?;
        let (ready, failed) = prepare(records, self.config.dimension);
        let mut report = UpsertReport {
            succeeded: Vec::with_capacity(ready.len()),
            failed,
        };
        if ready.is_empty() {
            return Ok(report);
        }
        self.ensure_class()?;
        self.ensure_properties(ready.iter().map(|(_, record)| &record.metadata))?;
        let client = self.client()?;
        let url = self.url("v1/batch/objects");
        for batch in ready.chunks(self.config.batch_size) {
            let body = batch_body(batch, &self.config.class_name);
            let outcome: Result<Vec<BatchObjectResult>, _> =
                http::execute_json(&self.config.retry, "Weaviate batch upsert", || {
                    client.post(url.clone()).json(&body)
                });
            match outcome {
                Ok(results) => apply_batch_results(batch, &results, &mut report),
                Err(failure) => {
                    let err = BackendError::from_service(KIND, failure);
                    report.fail_all(batch.iter().map(|(id, _)| id), &err.to_string());
                }
            }
        }
        debug!(
            "Weaviate upsert: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn query(
        &mut self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RawMatch>, BackendError> {
        ensure_open(self.client.is_none(), KIND)?;
        if vector.len() != self.config.dimension {
            return Err(ConfigurationError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            }
            .into());
        }
        if k == 0 || !self.class_exists()? {
            return Ok(Vec::new());
        }
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            // A key no object has ever carried cannot match.
            if !self.knows_keys(filter)? {
                debug!("Weaviate filter names an unknown property; no matches");
                return Ok(Vec::new());
            }
        }
        let query = near_vector_query(&self.config.class_name, vector, k, filter);
        let data = self.graphql(query, "Weaviate query")?;
        parse_matches(&data, &self.config.class_name)
    }

    fn count(&mut self) -> Result<usize, BackendError> {
        ensure_open(self.client.is_none(), KIND)?;
        if !self.class_exists()? {
            return Ok(0);
        }
        let class = &self.config.class_name;
        let data = self.graphql(format!("{{ Aggregate {{ {class} {{ meta {{ count }} }} }} }}"), "Weaviate count")?;
        data.pointer(&format!("/Aggregate/{class}/0/meta/count"))
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| BackendError::protocol(KIND, "aggregate response without a count"))
    }

    fn delete_matching(&mut self, filter: &MetadataFilter) -> Result<(), BackendError> {
        ensure_open(self.client.is_none(), KIND)?;
        if filter.is_empty() || !self.class_exists()? || !self.knows_keys(filter)? {
            return Ok(());
        }
        let client = self.client()?;
        let url = self.url("v1/batch/objects");
        let body = delete_body(&self.config.class_name, filter);
        let outcome: Value = http::execute_json(&self.config.retry, "Weaviate batch delete", || {
            client.delete(url.clone()).json(&body)
        })
        .map_err(|f| BackendError::from_service(KIND, f))?;
        let (removed, failed) = delete_counts(&outcome);
        if failed > 0 {
            return Err(BackendError::Request {
                backend: KIND,
                reason: format!("{failed} object(s) could not be deleted"),
            });
        }
        debug!("Weaviate delete removed {removed} object(s)");
        Ok(())
    }

    /// Probes first; deleting a missing collection is a no-op.
    fn delete_all(&mut self) -> Result<(), BackendError> {
        ensure_open(self.client.is_none(), KIND)?;
        if !self.class_exists()? {
            debug!("Weaviate collection {} already absent", self.config.class_name);
            return Ok(());
        }
        let client = self.client()?;
        let url = self.url(&self.schema_path());
        match http::execute(&self.config.retry, "Weaviate delete collection", || client.delete(url.clone())) {
            Ok(_) | Err(Attempted { error: ServiceError::NotFound(_), .. }) => {}
            Err(failure) => return Err(BackendError::from_service(KIND, failure)),
        }
        info!("deleted Weaviate collection {}", self.config.class_name);
        self.class_ready = false;
        self.properties.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.client.take().is_some() {
            debug!("closed Weaviate handle for {}", self.config.class_name);
        }
        self.class_ready = false;
        self.properties.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

fn parse_base(raw: &str) -> Result<Url, BackendError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigurationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigurationError::InvalidUrl {
            url: raw.to_string(),
            reason: "expected http or https".to_string(),
        }
        .into());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Class names are spliced into URLs and GraphQL, so only plain identifiers pass.
fn validate_class_name(name: &str) -> Result<(), ConfigurationError> {
    let mut chars = name.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_uppercase());
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidCollectionName(name.to_string()))
    }
}

fn default_headers(api_key: Option<&str>) -> Result<HeaderMap, BackendError> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        let value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| BackendError::Configuration(ConfigurationError::Missing("weaviate.api_key")))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

fn server_version(meta: &Value) -> &str {
    meta.get("version").and_then(Value::as_str).unwrap_or("?")
}

/// Caller ids that already are UUIDs are used as-is.
pub fn object_id(id: &str) -> Uuid {
    Uuid::parse_str(id).unwrap_or_else(|_| Uuid::new_v5(&ID_NAMESPACE, id.as_bytes()))
}

fn class_body(class_name: &str) -> Value {
    json!({
        "class": class_name,
        "vectorizer": "none",
        "vectorIndexConfig": { "distance": "cosine" },
        "properties": [
            { "name": BASE_PROPERTIES[0], "dataType": ["text"] },
            { "name": BASE_PROPERTIES[1], "dataType": ["text"], "tokenization": "field" },
            { "name": BASE_PROPERTIES[2], "dataType": ["text"], "indexFilterable": false, "indexSearchable": false },
        ],
    })
}

fn property_body(name: &str, sample: &MetadataValue) -> Value {
    match sample {
        MetadataValue::String(_) => json!({ "name": name, "dataType": ["text"], "tokenization": "field" }),
        MetadataValue::Bool(_) => json!({ "name": name, "dataType": ["boolean"] }),
        MetadataValue::Integer(_) | MetadataValue::Float(_) => json!({ "name": name, "dataType": ["number"] }),
    }
}

fn schema_properties(schema: &Value) -> BTreeSet<String> {
    schema
        .get("properties")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|p| p.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Keys absent from `known`, each with the first value seen for it.
fn unseen_properties<'a>(
    metadata: impl IntoIterator<Item = &'a Metadata>,
    known: &BTreeSet<String>,
) -> BTreeMap<String, MetadataValue> {
    let mut unseen = BTreeMap::new();
    for (key, value) in metadata.into_iter().flatten() {
        if !known.contains(key) && !unseen.contains_key(key) {
            unseen.insert(key.clone(), value.clone());
        }
    }
    unseen
}

fn filter_is_known(filter: &MetadataFilter, known: &BTreeSet<String>) -> bool {
    filter.clauses().iter().all(|(key, _)| known.contains(key))
}

fn batch_body(batch: &[(String, Record)], class_name: &str) -> Value {
    let objects: Vec<Value> = batch
        .iter()
        .map(|(id, record)| {
            let mut properties = metadata::to_json_object(&record.metadata);
            properties.insert("text".into(), Value::String(record.text.clone()));
            properties.insert("record_id".into(), Value::String(id.clone()));
            properties.insert(
                "metadata_json".into(),
                Value::String(serde_json::to_string(&record.metadata).unwrap_or_default()),
            );
            json!({
                "class": class_name,
                "id": object_id(id).to_string(),
                "properties": properties,
                "vector": record.vector,
            })
        })
        .collect();
    json!({ "objects": objects })
}

/// Results come back in request order.
fn apply_batch_results(batch: &[(String, Record)], results: &[BatchObjectResult], report: &mut UpsertReport) {
    for (i, (id, _)) in batch.iter().enumerate() {
        let errors: Vec<&str> = results
            .get(i)
            .and_then(|r| r.result.as_ref())
            .and_then(|r| r.errors.as_ref())
            .map(|e| e.error.iter().map(|m| m.message.as_str()).collect())
            .unwrap_or_default();
        if results.get(i).is_none() {
            report.fail_all([id], "missing from batch response");
        } else if errors.is_empty() {
            report.succeeded.push(id.clone());
        } else {
            report.fail_all([id], &errors.join("; "));
        }
    }
}

fn near_vector_query(class_name: &str, vector: &[f32], k: usize, filter: Option<&MetadataFilter>) -> String {
    let vector = vector
        .iter()
        .map(|x| if x.is_finite() { x.to_string() } else { "0".to_string() })
        .collect::<Vec<_>>()
        .join(",");
    let filter = match filter.filter(|f| !f.is_empty()) {
        Some(f) => format!(", where: {}", where_clause(f)),
        None => String::new(),
    };
    format!(
        "{{ Get {{ {class_name}(nearVector: {{vector: [{vector}]}}, limit: {k}{filter}) \
         {{ text record_id metadata_json _additional {{ id distance }} }} }} }}"
    )
}

/// Value field and JSON literal of one equality operand.
fn where_value(value: &MetadataValue) -> (&'static str, Value) {
    match value {
        MetadataValue::String(s) => ("valueText", Value::String(s.clone())),
        MetadataValue::Bool(b) => ("valueBoolean", Value::Bool(*b)),
        MetadataValue::Integer(i) => ("valueNumber", Value::from(*i)),
        MetadataValue::Float(x) => ("valueNumber", Value::from(*x)),
    }
}

/// GraphQL form. Keys and strings go through JSON encoding, which escapes them.
fn where_clause(filter: &MetadataFilter) -> String {
    let operands: Vec<String> = filter
        .clauses()
        .iter()
        .map(|(key, value)| {
            let (field, literal) = where_value(value);
            let path = Value::String(key.clone());
            format!("{{path: [{path}], operator: Equal, {field}: {literal}}}")
        })
        .collect();
    if operands.len() == 1 {
        operands.into_iter().next().unwrap_or_default()
    } else {
        format!("{{operator: And, operands: [{}]}}", operands.join(", "))
    }
}

/// REST form, as taken by batch deletes.
fn where_json(filter: &MetadataFilter) -> Value {
    let mut operands: Vec<Value> = filter
        .clauses()
        .iter()
        .map(|(key, value)| {
            let (field, literal) = where_value(value);
            let mut operand = Map::new();
            operand.insert("path".into(), json!([key]));
            operand.insert("operator".into(), Value::from("Equal"));
            operand.insert(field.into(), literal);
            Value::Object(operand)
        })
        .collect();
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        json!({ "operator": "And", "operands": operands })
    }
}

fn delete_body(class_name: &str, filter: &MetadataFilter) -> Value {
    json!({
        "match": { "class": class_name, "where": where_json(filter) },
        "output": "minimal",
    })
}

/// `(successful, failed)` from a batch delete response.
fn delete_counts(outcome: &Value) -> (u64, u64) {
    let count = |name: &str| {
        outcome
            .pointer(&format!("/results/{name}"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    (count("successful"), count("failed"))
}

fn parse_matches(data: &Value, class_name: &str) -> Result<Vec<RawMatch>, BackendError> {
    let hits = match data.pointer(&format!("/Get/{class_name}")) {
        Some(Value::Array(hits)) => hits,
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(_) => return Err(BackendError::protocol(KIND, "Get result is not a list")),
    };
    hits.iter()
        .map(|hit| {
            let object = hit
                .as_object()
                .ok_or_else(|| BackendError::protocol(KIND, "hit is not an object"))?;
            let distance = hit
                .pointer("/_additional/distance")
                .and_then(Value::as_f64)
                .ok_or_else(|| BackendError::protocol(KIND, "hit without distance"))?;
            let uuid = hit.pointer("/_additional/id").and_then(Value::as_str).unwrap_or_default();
            let str_field = |name: &str| object.get(name).and_then(Value::as_str);
            Ok(RawMatch {
                id: str_field("record_id").unwrap_or(uuid).to_string(),
                text: str_field("text").unwrap_or_default().to_string(),
                score: distance as f32,
                metadata: metadata::from_stored(str_field("metadata_json"), &Map::new()),
            })
        })
        .collect()
}

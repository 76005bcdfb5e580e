//! Pinecone (managed index) backend over the REST API.
//!
//! The control plane (`api.pinecone.io`) creates, describes and deletes the
//! index; the data plane lives on the host the index reports. The index is
//! created lazily on first upsert with the cosine metric, so native scores are
//! similarities in `[-1, 1]`, higher is better.

use std::thread::sleep;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::backend::{
    ensure_open, prepare, BackendError, BackendKind, RawMatch, Record, ScoreKind, UpsertReport, VectorBackend,
};
use crate::error::ConfigurationError;
use crate::http::{self, ServiceError};
use crate::metadata::{self, MetadataFilter};
use crate::retry::{Attempted, RetryPolicy};

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
pub const DEFAULT_INDEX: &str = "rag-documents";
pub const DEFAULT_CLOUD: &str = "aws";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const API_VERSION: &str = "2024-07";
/// Pinecone's recommended maximum vectors per upsert request.
pub const DEFAULT_UPSERT_BATCH: usize = 100;

const KIND: BackendKind = BackendKind::Pinecone;

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub index: String,
    pub dimension: usize,
    pub cloud: String,
    pub region: String,
    pub namespace: String,
    pub control_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub upsert_batch: usize,
    /// How long to wait for a freshly created index to become ready.
    pub ready_timeout: Duration,
}

impl PineconeConfig {
    pub fn new(api_key: impl Into<String>, index: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_key: api_key.into(),
            index: index.into(),
            dimension,
            cloud: DEFAULT_CLOUD.to_string(),
            region: DEFAULT_REGION.to_string(),
            namespace: String::new(),
            control_url: DEFAULT_CONTROL_URL.to_string(),
            timeout: http::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            upsert_batch: DEFAULT_UPSERT_BATCH,
            ready_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    total_vector_count: usize,
}

#[derive(Debug)]
pub struct PineconeBackend {
    /// `None` once closed.
    client: Option<Client>,
    config: PineconeConfig,
    /// Data-plane base URL; `None` while the index does not exist.
    host: Option<String>,
}

impl PineconeBackend {
    /// Connects and describes the index. A missing index is not an error; it
    /// is created on first upsert. An existing index of another dimension is.
    pub fn open(config: PineconeConfig) -> Result<Self, BackendError> {
        if config.api_key.is_empty() {
            return Err(ConfigurationError::Missing("pinecone.api_key").into());
        }
        if config.dimension == 0 {
            return Err(ConfigurationError::ZeroDimension.into());
        }
        if config.upsert_batch == 0 {
            return Err(ConfigurationError::InvalidBatchSize.into());
        }
        let client = http::build_client(config.timeout, default_headers(&config.api_key)?)
            .map_err(|e| BackendError::Request { backend: KIND, reason: e.to_string() })?;
        let mut backend = Self {
            client: Some(client),
            config,
            host: None,
        };
        backend.host = match backend.describe()? {
            Some(desc) => {
                check_dimension(&desc, backend.config.dimension)?;
                Some(data_plane_url(&desc.host))
            }
            None => None,
        };
        info!("opened Pinecone index {} (exists: {})", backend.config.index, backend.host.is_some());
        Ok(backend)
    }

    fn client(&self) -> Result<&Client, BackendError> {
        self.client.as_ref().ok_or(BackendError::ClosedHandle(KIND))
    }

    fn index_url(&self) -> String {
        format!("{}/indexes/{}", self.config.control_url.trim_end_matches('/'), self.config.index)
    }

    fn describe(&self) -> Result<Option<IndexDescription>, BackendError> {
        let client = self.client()?;
        let url = self.index_url();
        match http::execute_json::<IndexDescription>(&self.config.retry, "describe Pinecone index", || {
            client.get(&url)
        }) {
            Ok(desc) => Ok(Some(desc)),
            Err(Attempted { error: ServiceError::NotFound(_), .. }) => Ok(None),
            Err(failure) => Err(BackendError::from_service(KIND, failure)),
        }
    }

    /// Returns the data-plane URL, creating the index and waiting for it if needed.
    fn ensure_index(&mut self) -> Result<String, BackendError> {
        if let Some(host) = &self.host {
            return Ok(host.clone());
        }
        let client = self.client()?;
        let body = create_index_body(&self.config);
        let url = format!("{}/indexes", self.config.control_url.trim_end_matches('/'));
        match http::execute(&self.config.retry, "create Pinecone index", || client.post(&url).json(&body)) {
            Ok(_) => info!("created Pinecone index {}", self.config.index),
            // Created concurrently by someone else.
            Err(Attempted { error: ServiceError::Conflict(_), .. }) => {
                debug!("Pinecone index {} already exists", self.config.index)
            }
            Err(failure) => return Err(BackendError::from_service(KIND, failure)),
        }

        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            if let Some(desc) = self.describe()? {
                if desc.status.ready {
                    check_dimension(&desc, self.config.dimension)?;
                    let host = data_plane_url(&desc.host);
                    self.host = Some(host.clone());
                    return Ok(host);
                }
            }
            if Instant::now() >= deadline {
                return Err(BackendError::ServiceUnavailable {
                    backend: KIND,
                    attempts: 1,
                    reason: format!("index {} not ready after {:?}", self.config.index, self.config.ready_timeout),
                });
            }
            sleep(Duration::from_secs(1));
        }
    }
}

impl VectorBackend for PineconeBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Sends records in batches of `upsert_batch`; a failed batch marks only
    /// its own records as failed.
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
        let host = self.ensure_index()?;
        let client = self.client()?;
        let url = format!("{host}/vectors/upsert");
        for batch in ready.chunks(self.config.upsert_batch) {
            let body = upsert_body(batch, &self.config.namespace);
            let ids = batch.iter().map(|(id, _)| id);
            match http::execute(&self.config.retry, "Pinecone upsert", || client.post(&url).json(&body)) {
                Ok(_) => report.succeeded.extend(ids.cloned()),
                Err(failure) => {
                    let err = BackendError::from_service(KIND, failure);
                    report.fail_all(ids, &err.to_string());
                }
            }
        }
        debug!(
            "Pinecone upsert: {} succeeded, {} failed",
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
        let client = self.client()?;
        if vector.len() != self.config.dimension {
            return Err(ConfigurationError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            }
            .into());
        }
        let Some(host) = &self.host else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let body = query_body(vector, k, filter, &self.config.namespace);
        let url = format!("{host}/query");
        let response: QueryResponse = http::execute_json(&self.config.retry, "Pinecone query", || {
            client.post(&url).json(&body)
        })
        .map_err(|f| BackendError::from_service(KIND, f))?;
        Ok(into_matches(response))
    }

    fn count(&mut self) -> Result<usize, BackendError> {
        let client = self.client()?;
        let Some(host) = &self.host else {
            return Ok(0);
        };
        let url = format!("{host}/describe_index_stats");
        let stats: IndexStats = http::execute_json(&self.config.retry, "Pinecone index stats", || {
            client.post(&url).json(&json!({}))
        })
        .map_err(|f| BackendError::from_service(KIND, f))?;
        Ok(stats.total_vector_count)
    }

    fn delete_matching(&mut self, filter: &MetadataFilter) -> Result<(), BackendError> {
        let client = self.client()?;
        let Some(host) = &self.host else {
            return Ok(());
        };
        if filter.is_empty() {
            return Ok(());
        }
        let url = format!("{host}/vectors/delete");
        let body = delete_body(filter, &self.config.namespace);
        match http::execute(&self.config.retry, "Pinecone delete", || client.post(&url).json(&body)) {
            // An unused namespace is reported as missing.
            Ok(_) | Err(Attempted { error: ServiceError::NotFound(_), .. }) => Ok(()),
            Err(failure) => Err(BackendError::from_service(KIND, failure)),
        }
    }

    /// Deletes the whole index without probing; a missing index counts as deleted.
    fn delete_all(&mut self) -> Result<(), BackendError> {
        let client = self.client()?;
        let url = self.index_url();
        match http::execute(&self.config.retry, "delete Pinecone index", || client.delete(&url)) {
            Ok(_) => info!("deleted Pinecone index {}", self.config.index),
            Err(Attempted { error: ServiceError::NotFound(_), .. }) => {
                debug!("Pinecone index {} already absent", self.config.index)
            }
            Err(failure) => return Err(BackendError::from_service(KIND, failure)),
        }
        self.host = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.client.take().is_some() {
            debug!("closed Pinecone handle for {}", self.config.index);
        }
        self.host = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_none()
    }
}

fn default_headers(api_key: &str) -> Result<HeaderMap, BackendError> {
    let mut headers = HeaderMap::new();
    let key = HeaderValue::from_str(api_key)
        .map_err(|_| BackendError::Configuration(ConfigurationError::Missing("pinecone.api_key")))?;
    headers.insert("Api-Key", key);
    headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
    Ok(headers)
}

fn check_dimension(desc: &IndexDescription, expected: usize) -> Result<(), BackendError> {
    if desc.dimension != expected {
        return Err(ConfigurationError::DimensionMismatch {
            expected,
            actual: desc.dimension,
        }
        .into());
    }
    Ok(())
}

/// Index hosts come back without a scheme; local emulators include one.
fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn create_index_body(config: &PineconeConfig) -> Value {
    json!({
        "name": config.index,
        "dimension": config.dimension,
        "metric": "cosine",
        "spec": { "serverless": { "cloud": config.cloud, "region": config.region } },
    })
}

fn upsert_body(batch: &[(String, Record)], namespace: &str) -> Value {
    let vectors: Vec<Value> = batch
        .iter()
        .map(|(id, record)| {
            let mut meta = metadata::to_json_object(&record.metadata);
            meta.insert("text".into(), Value::String(record.text.clone()));
            meta.insert(
                "metadata_json".into(),
                Value::String(serde_json::to_string(&record.metadata).unwrap_or_default()),
            );
            json!({ "id": id, "values": record.vector, "metadata": meta })
        })
        .collect();
    json!({ "vectors": vectors, "namespace": namespace })
}

fn query_body(vector: &[f32], k: usize, filter: Option<&MetadataFilter>, namespace: &str) -> Value {
    let mut body = json!({
        "vector": vector,
        "topK": k,
        "includeMetadata": true,
        "includeValues": false,
        "namespace": namespace,
    });
    if let Some(filter) = filter.filter(|f| !f.is_empty()) {
        body["filter"] = filter_json(filter);
    }
    body
}

fn delete_body(filter: &MetadataFilter, namespace: &str) -> Value {
    json!({ "filter": filter_json(filter), "namespace": namespace })
}

/// Top-level keys are ANDed by Pinecone.
fn filter_json(filter: &MetadataFilter) -> Value {
    let clauses: Map<String, Value> = filter
        .clauses()
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value.to_json() })))
        .collect();
    Value::Object(clauses)
}

fn into_matches(response: QueryResponse) -> Vec<RawMatch> {
    response
        .matches
        .into_iter()
        .map(|m| {
            let text = m
                .metadata
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let blob = m.metadata.get("metadata_json").and_then(Value::as_str);
            RawMatch {
                metadata: metadata::from_stored(blob, &m.metadata),
                id: m.id,
                text,
                score: m.score,
            }
        })
        .collect()
}

//! Blocking HTTP plumbing shared by the remote services (embeddings, Pinecone, Weaviate).
//!
//! Every call is classified into a [`ServiceError`] so that callers can tell
//! transient failures (worth retrying) from fatal ones.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::retry::{Attempted, RetryPolicy};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body text kept in error messages.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Transient(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The resource already exists or is being changed concurrently.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_) | ServiceError::Transient(_))
    }
}

pub(crate) fn build_client(timeout: Duration, headers: HeaderMap) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
}

/// Sends one request and maps non-2xx statuses to [`ServiceError`].
pub(crate) fn send(request: RequestBuilder) -> Result<Response, ServiceError> {
    let response = request.send().map_err(classify_transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(classify_status(status, &body))
}

/// Sends a request built by `build` under `policy`, rebuilding it on every attempt.
pub(crate) fn execute(
    policy: &RetryPolicy,
    what: &str,
    build: impl Fn() -> RequestBuilder,
) -> Result<Response, Attempted<ServiceError>> {
    policy.run(what, || send(build()), ServiceError::is_transient)
}

/// [`execute`], then decode the JSON body.
pub(crate) fn execute_json<T: DeserializeOwned>(
    policy: &RetryPolicy,
    what: &str,
    build: impl Fn() -> RequestBuilder,
) -> Result<T, Attempted<ServiceError>> {
    let response = execute(policy, what, build)?;
    response.json::<T>().map_err(|e| Attempted {
        error: ServiceError::Malformed(format!("{what}: {e}")),
        attempts: 1,
    })
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    let detail = format!("HTTP {status}: {}", truncate(body.trim(), MAX_ERROR_BODY));
    match status {
        StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Auth(detail),
        StatusCode::NOT_FOUND => ServiceError::NotFound(detail),
        StatusCode::CONFLICT => ServiceError::Conflict(detail),
        StatusCode::REQUEST_TIMEOUT => ServiceError::Transient(detail),
        s if s.is_server_error() => ServiceError::Transient(detail),
        _ => ServiceError::Rejected(detail),
    }
}

fn classify_transport(err: reqwest::Error) -> ServiceError {
    if err.is_builder() {
        ServiceError::Rejected(err.to_string())
    } else {
        ServiceError::Transient(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

//! Backend-agnostic types and traits for `diffproxy`.
//!
//! This crate intentionally contains no IO: no network client, no process
//! spawning, no filesystem access. It only describes the request/response
//! shapes that `diffproxy-fetch`, `diffproxy-differ`, and `diffproxy-server`
//! agree on.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("scheme not allowed: {0}")]
    DisallowedScheme(String),
    #[error("unknown diff algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("undecodable content: {0}")]
    UndecodableContent(String),
    #[error("upstream returned {status}: {message}")]
    UpstreamFailure { status: u16, message: String },
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),
    #[error("upstream unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("response body too large: {0}")]
    BodyTooLarge(String),
    #[error("hash mismatch: {0}")]
    HashMismatch(String),
    #[error("diff worker pool is broken: {0}")]
    WorkerPoolBroken(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status code per spec.md §7's error-kind table.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidRequest(_) => 400,
            Error::DisallowedScheme(_) => 403,
            Error::UnknownAlgorithm(_) => 404,
            Error::UndecodableContent(_) => 422,
            Error::UpstreamFailure { .. } => 502,
            Error::NetworkUnreachable(_) => 502,
            Error::BodyTooLarge(_) => 502,
            Error::HashMismatch(_) => 502,
            Error::UpstreamTimeout(_) => 504,
            Error::WorkerPoolBroken(_) => 500,
        }
    }
}

/// Every error response is a JSON envelope `{code, error}` with no ETag,
/// per spec.md §4.5/§4.6 ("ETags are never emitted on error responses").
/// This is the only place that invariant is enforced: success responses
/// attach an ETag in the orchestrator, and this impl never does.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "code": status,
            "error": self.to_string(),
        });
        (code, axum::Json(body)).into_response()
    }
}

/// A fully parsed and validated diff request, ready to drive the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRequest {
    pub algorithm: String,
    pub a_url: String,
    pub b_url: String,
    pub a_hash: Option<String>,
    pub b_hash: Option<String>,
    pub options: BTreeMap<String, String>,
    pub pass_headers: Vec<String>,
    pub client_origin: Option<String>,
    pub if_none_match: Option<String>,
}

/// What the caller asks `UpstreamFetcher::fetch` to do for one of the two
/// resources named in a `DiffRequest`.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub url: String,
    /// Headers forwarded from the client's inbound request, already
    /// filtered down to the names listed in `pass_headers`.
    pub forwarded_headers: BTreeMap<String, String>,
    pub max_bytes: u64,
    pub timeout: Duration,
    pub expected_hash: Option<String>,
    /// False in `production` deployment mode; `file://` is then rejected.
    pub allow_file_scheme: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub from_archive: bool,
    pub truncated: bool,
}

#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult>;
}

/// The result of C2's charset/content-type resolution over a `FetchResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedBody {
    pub bytes: Vec<u8>,
    pub text: Option<String>,
    pub encoding: String,
}

/// A unit of work handed to the diff worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffJob {
    pub algorithm: String,
    pub a: DecodedBody,
    pub b: DecodedBody,
    pub options: BTreeMap<String, String>,
}

/// The opaque, algorithm-defined result of a diff, plus the one field every
/// algorithm is expected to fill in when it applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffOutcome {
    pub change_count: Option<u64>,
    pub diff: serde_json::Value,
}

/// One registered diff algorithm. Implementations run inside the isolated
/// worker process (see `diffproxy-differ`); the orchestrator only ever sees
/// `name()` / `requires_text()` to validate requests before dispatch.
pub trait DiffAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether both inputs must have decoded to text before this algorithm
    /// can run (spec.md §4.2: identity/length bypass the decoder).
    fn requires_text(&self) -> bool;
    fn run(&self, a: &DecodedBody, b: &DecodedBody, options: &BTreeMap<String, String>)
        -> Result<DiffOutcome>;
}

/// Deterministic fingerprint of the parts of a `DiffRequest` that determine
/// its response, per spec.md §4.5 / §3 ("Invariants"). `a_identity` /
/// `b_identity` should be the supplied hash when present, or else a hash of
/// the fetched body; equal inputs must always produce an equal token.
pub fn etag_key(
    algorithm: &str,
    a_url: &str,
    b_url: &str,
    options: &BTreeMap<String, String>,
    a_identity: &str,
    b_identity: &str,
) -> String {
    let mut key = String::new();
    key.push_str("algorithm=");
    key.push_str(algorithm);
    key.push_str("\na_url=");
    key.push_str(a_url);
    key.push_str("\nb_url=");
    key.push_str(b_url);
    key.push_str("\noptions=");
    for (k, v) in options {
        key.push_str(k);
        key.push('=');
        key.push_str(v);
        key.push(';');
    }
    key.push_str("\na_identity=");
    key.push_str(a_identity);
    key.push_str("\nb_identity=");
    key.push_str(b_identity);
    key
}

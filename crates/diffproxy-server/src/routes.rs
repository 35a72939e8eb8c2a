use crate::cors::apply_cors_headers;
use crate::etag::compute_etag;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use diffproxy_core::{DecodedBody, Error, FetchResult, FetchSpec, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn healthcheck() -> &'static str {
    "ok"
}

/// Query parameters for `GET /{algorithm}`: `a`/`b`/`a_hash`/`b_hash`/
/// `pass_headers` are named explicitly (spec.md §6); everything else
/// (`format`, `include`, algorithm-specific knobs) is collected into
/// `options` via `#[serde(flatten)]`.
#[derive(Debug, serde::Deserialize)]
pub struct DiffQuery {
    a: Option<String>,
    b: Option<String>,
    a_hash: Option<String>,
    b_hash: Option<String>,
    #[serde(default)]
    pass_headers: String,
    #[serde(flatten)]
    options: BTreeMap<String, String>,
}

fn parse_pass_headers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// spec.md §6/§9: headers forwarded are exactly those the client named in
/// `pass_headers` that are also present on the inbound request — including
/// Authorization/Cookie if the client asks for them. No denylist sits on top
/// of the client's own choice.
fn forwarded_headers(inbound: &HeaderMap, pass_headers: &[String]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in pass_headers {
        if let Some(value) = inbound.get(name).and_then(|v| v.to_str().ok()) {
            out.insert(name.clone(), value.to_string());
        }
    }
    out
}

fn validate_url(raw: &str, allow_file_scheme: bool) -> Result<url::Url> {
    let url = url::Url::parse(raw).map_err(|_| Error::InvalidRequest(format!("malformed URL: {raw}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        "file" => {
            if allow_file_scheme {
                Ok(url)
            } else {
                Err(Error::DisallowedScheme(
                    "file:// is disallowed in production".to_string(),
                ))
            }
        }
        other => Err(Error::InvalidRequest(format!("disallowed scheme: {other}"))),
    }
}

/// The result of a `tokio::join!`'d fetch pair: each side is handled
/// independently so one side's error doesn't mask the other's message.
async fn fetch_both(
    state: &AppState,
    a_spec: FetchSpec,
    b_spec: FetchSpec,
) -> (Result<FetchResult>, Result<FetchResult>) {
    tokio::join!(state.fetcher.fetch(&a_spec), state.fetcher.fetch(&b_spec))
}

fn decoded_body_for(algorithm_requires_text: bool, result: &FetchResult) -> Result<DecodedBody> {
    if algorithm_requires_text {
        diffproxy_fetch::decode(result)
    } else {
        Ok(DecodedBody {
            bytes: result.body.clone(),
            text: None,
            encoding: "binary".to_string(),
        })
    }
}

pub async fn diff(
    State(state): State<Arc<AppState>>,
    Path(algorithm): Path<String>,
    Query(query): Query<DiffQuery>,
    headers: HeaderMap,
) -> Response {
    match diff_inner(&state, algorithm, query, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn diff_inner(
    state: &AppState,
    algorithm: String,
    query: DiffQuery,
    headers: &HeaderMap,
) -> Result<Response> {
    let algo = state
        .registry
        .get(&algorithm)
        .ok_or_else(|| Error::UnknownAlgorithm(algorithm.clone()))?;

    let a_url_raw = query
        .a
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing required query parameter: a".to_string()))?;
    let b_url_raw = query
        .b
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing required query parameter: b".to_string()))?;

    let allow_file_scheme = !state.config.is_production();
    let a_url = validate_url(&a_url_raw, allow_file_scheme)?;
    let b_url = validate_url(&b_url_raw, allow_file_scheme)?;

    let client_origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let if_none_match = headers
        .get(axum::http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    // The preliminary ETag (spec.md §4.4 step 3) is only a pure function of
    // the request *before* any fetch when both hashes are supplied by the
    // client; only then is (a_hash-or-body-hash, b_hash-or-body-hash) fully
    // known up front. Without a hash, identity depends on the fetched body,
    // so the short-circuit here only fires in the hash-hinted case; the
    // no-hash case is still caught below, right before the diff is
    // dispatched, once the real identity is known (spec.md §8's invariant is
    // "no diff is computed", not "no fetch happens").
    if query.a_hash.is_some() && query.b_hash.is_some() {
        let preliminary_etag = compute_etag(
            &algorithm,
            a_url.as_str(),
            b_url.as_str(),
            &query.options,
            query.a_hash.as_deref().unwrap_or(""),
            query.b_hash.as_deref().unwrap_or(""),
        );
        if if_none_match.as_deref() == Some(preliminary_etag.as_str()) {
            return Ok(not_modified(&preliminary_etag, &state.config, client_origin.as_deref()));
        }
    }

    let pass_headers = parse_pass_headers(&query.pass_headers);
    let forwarded = forwarded_headers(headers, &pass_headers);
    let timeout = Duration::from_millis(state.config.fetch_timeout_ms);

    let a_spec = FetchSpec {
        url: a_url.to_string(),
        forwarded_headers: forwarded.clone(),
        max_bytes: state.config.max_body_bytes,
        timeout,
        expected_hash: query.a_hash.clone(),
        allow_file_scheme,
    };
    let b_spec = FetchSpec {
        url: b_url.to_string(),
        forwarded_headers: forwarded,
        max_bytes: state.config.max_body_bytes,
        timeout,
        expected_hash: query.b_hash.clone(),
        allow_file_scheme,
    };

    let (a_result, b_result) = fetch_both(state, a_spec, b_spec).await;
    let a_result = a_result?;
    let b_result = b_result?;

    let a_identity = query.a_hash.clone().unwrap_or_else(|| sha256_hex(&a_result.body));
    let b_identity = query.b_hash.clone().unwrap_or_else(|| sha256_hex(&b_result.body));

    let final_etag = compute_etag(
        &algorithm,
        a_url.as_str(),
        b_url.as_str(),
        &query.options,
        &a_identity,
        &b_identity,
    );
    if if_none_match.as_deref() == Some(final_etag.as_str()) {
        return Ok(not_modified(&final_etag, &state.config, client_origin.as_deref()));
    }

    let a_decoded = decoded_body_for(algo.requires_text(), &a_result)?;
    let b_decoded = decoded_body_for(algo.requires_text(), &b_result)?;

    let outcome = state
        .pool
        .submit(diffproxy_core::DiffJob {
            algorithm: algorithm.clone(),
            a: a_decoded,
            b: b_decoded,
            options: query.options.clone(),
        })
        .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e @ Error::WorkerPoolBroken(_)) => {
            handle_fatal_pool_breakage(state, &e);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let mut body = serde_json::json!({ "diff": outcome.diff });
    if let Some(change_count) = outcome.change_count {
        body["change_count"] = serde_json::json!(change_count);
    }

    let mut response = Json(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&final_etag) {
        response.headers_mut().insert(axum::http::header::ETAG, value);
    }
    apply_cors_headers(
        response.headers_mut(),
        &state.config.cors_allow_origin,
        client_origin.as_deref(),
    );
    Ok(response)
}

/// A `304 Not Modified` response carrying the matched ETag and CORS headers,
/// no body (spec.md §4.5: "304 with the same ETag header, no body, and no
/// diff is computed").
fn not_modified(etag: &str, config: &crate::config::Config, client_origin: Option<&str>) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(axum::http::header::ETAG, value);
    }
    apply_cors_headers(response.headers_mut(), &config.cors_allow_origin, client_origin);
    response
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

/// spec.md §4.3/§9: once the pool is fatally broken (two consecutive
/// corruptions), the server either shuts down with exit code 10 or, if
/// `RESTART_BROKEN_DIFFER` is set, stays up for an external supervisor to
/// handle. The exit is delayed slightly so the in-flight 500 response has
/// a chance to reach the client first.
fn handle_fatal_pool_breakage(state: &AppState, e: &Error) {
    eprintln!("diffproxy: diff worker pool fatally broken: {e}");
    if state.config.restart_broken_differ {
        eprintln!("diffproxy: RESTART_BROKEN_DIFFER set, not exiting");
        return;
    }
    eprintln!("diffproxy: exiting with code 10 for supervisor restart");
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::process::exit(10);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_headers_is_parsed_case_insensitively_and_trimmed() {
        let parsed = parse_pass_headers(" User-Agent , Accept-Language ,,");
        assert_eq!(parsed, vec!["user-agent", "accept-language"]);
    }

    #[test]
    fn headers_named_in_pass_headers_are_forwarded_including_authorization() {
        let mut inbound = HeaderMap::new();
        inbound.insert(axum::http::header::AUTHORIZATION, "Bearer xyz".parse().unwrap());
        inbound.insert("x-custom", "keep-me".parse().unwrap());
        let pass = parse_pass_headers("authorization,x-custom");
        let forwarded = forwarded_headers(&inbound, &pass);
        assert_eq!(forwarded.get("authorization"), Some(&"Bearer xyz".to_string()));
        assert_eq!(forwarded.get("x-custom"), Some(&"keep-me".to_string()));
    }

    #[test]
    fn headers_not_named_in_pass_headers_are_not_forwarded() {
        let mut inbound = HeaderMap::new();
        inbound.insert(axum::http::header::AUTHORIZATION, "Bearer xyz".parse().unwrap());
        let pass = parse_pass_headers("x-custom");
        let forwarded = forwarded_headers(&inbound, &pass);
        assert!(forwarded.is_empty());
    }

    #[test]
    fn validate_url_rejects_unknown_scheme() {
        let err = validate_url("ftp://example.com/a", true).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn validate_url_rejects_file_scheme_when_disallowed() {
        let err = validate_url("file:///etc/passwd", false).unwrap_err();
        assert!(matches!(err, Error::DisallowedScheme(_)));
    }

    #[test]
    fn validate_url_accepts_file_scheme_when_allowed() {
        let url = validate_url("file:///tmp/a.txt", true).unwrap();
        assert_eq!(url.scheme(), "file");
    }

    #[test]
    fn validate_url_rejects_malformed_input() {
        let err = validate_url("not a url", true).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}

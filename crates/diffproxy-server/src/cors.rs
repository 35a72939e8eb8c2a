use axum::http::{HeaderMap, HeaderValue};

/// The host (and, if non-default, port) of an `Origin` header value, used to
/// compare against a bare-domain allowlist entry (spec.md §6/§8 example:
/// whitelist `one.com,two.com,three.com` matches `Origin: http://two.com`).
/// Falls back to the raw string when it doesn't parse as a URL, so an
/// allowlist entry that itself includes a scheme still matches literally.
fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split("://").nth(1).unwrap_or(origin);
    Some(rest.trim_end_matches('/'))
}

/// Resolves the `Access-Control-Allow-Origin` value (if any) for a request,
/// per spec.md §4.6:
/// - `*` config: echo the client's `Origin` back and allow credentials
///   (a literal `*` would forbid credentialed requests, spec.md §9).
/// - allowlist config: echo the origin only when it is a listed member;
///   otherwise emit nothing.
pub fn resolve_allowed_origin(configured: &str, request_origin: Option<&str>) -> Option<String> {
    let origin = request_origin?;
    if configured.trim() == "*" {
        return Some(origin.to_string());
    }
    let host = origin_host(origin).unwrap_or(origin);
    let allowed = configured.split(',').map(|s| s.trim()).any(|candidate| {
        candidate == origin || candidate == host || origin_host(candidate) == Some(host)
    });
    if allowed {
        Some(origin.to_string())
    } else {
        None
    }
}

/// Inserts the CORS response headers for a resolved origin. Credentials are
/// only ever set alongside an actual `Access-Control-Allow-Origin` value;
/// the `Vary: Origin` header keeps shared caches from mixing up allowlisted
/// origins.
pub fn apply_cors_headers(headers: &mut HeaderMap, configured: &str, request_origin: Option<&str>) {
    let Some(origin) = resolve_allowed_origin(configured, request_origin) else {
        return;
    };
    let Ok(value) = HeaderValue::from_str(&origin) else {
        return;
    };
    headers.insert("access-control-allow-origin", value);
    headers.insert("access-control-allow-credentials", HeaderValue::from_static("true"));
    headers.insert("access-control-allow-headers", HeaderValue::from_static("x-requested-with"));
    headers.insert("access-control-allow-methods", HeaderValue::from_static("GET, OPTIONS"));
    headers.insert("vary", HeaderValue::from_static("Origin"));
}

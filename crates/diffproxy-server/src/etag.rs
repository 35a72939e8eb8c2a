use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Computes the quoted ETag entity-tag for a diff request, per spec.md
/// §4.5/§9 and grounded in the teacher's `FsCache::key_for_fetch_v2`
/// (`Sha256` over a field-prefixed string, `hex::encode`). Truncated to 16
/// hex characters: plenty of collision resistance for a cache-validation
/// token that's never the sole source of truth for a request's identity.
pub fn compute_etag(
    algorithm: &str,
    a_url: &str,
    b_url: &str,
    options: &BTreeMap<String, String>,
    a_identity: &str,
    b_identity: &str,
) -> String {
    let key = diffproxy_core::etag_key(algorithm, a_url, b_url, options, a_identity, b_identity);
    let digest = Sha256::digest(key.as_bytes());
    let hex = hex::encode(digest);
    format!("\"{}\"", &hex[..16])
}

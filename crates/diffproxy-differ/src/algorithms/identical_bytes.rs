use diffproxy_core::{DecodedBody, DiffAlgorithm, DiffOutcome, Result};
use std::collections::BTreeMap;

/// Byte-identity check. Bypasses C2 entirely (spec.md §4.2): operates on
/// `bytes`, never `text`.
pub struct IdenticalBytesDiff;

impl DiffAlgorithm for IdenticalBytesDiff {
    fn name(&self) -> &'static str {
        "identical_bytes"
    }

    fn requires_text(&self) -> bool {
        false
    }

    fn run(
        &self,
        a: &DecodedBody,
        b: &DecodedBody,
        _options: &BTreeMap<String, String>,
    ) -> Result<DiffOutcome> {
        let identical = a.bytes == b.bytes;
        Ok(DiffOutcome {
            change_count: Some(if identical { 0 } else { 1 }),
            diff: serde_json::json!({ "identical": identical }),
        })
    }
}

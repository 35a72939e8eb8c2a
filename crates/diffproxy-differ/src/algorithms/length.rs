use diffproxy_core::{DecodedBody, DiffAlgorithm, DiffOutcome, Result};
use std::collections::BTreeMap;

/// Compares raw byte lengths. Like `identical_bytes`, this bypasses C2
/// and looks only at `bytes`.
pub struct LengthDiff;

impl DiffAlgorithm for LengthDiff {
    fn name(&self) -> &'static str {
        "length"
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
        let a_len = a.bytes.len() as i64;
        let b_len = b.bytes.len() as i64;
        Ok(DiffOutcome {
            change_count: Some((b_len - a_len).unsigned_abs()),
            diff: serde_json::json!({
                "a_length": a_len,
                "b_length": b_len,
                "difference": b_len - a_len,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(bytes: &[u8]) -> DecodedBody {
        DecodedBody {
            bytes: bytes.to_vec(),
            text: None,
            encoding: "utf-8".to_string(),
        }
    }

    #[test]
    fn equal_lengths_have_zero_change_count() {
        let a = body(b"abcd");
        let b = body(b"wxyz");
        let out = LengthDiff.run(&a, &b, &BTreeMap::new()).unwrap();
        assert_eq!(out.change_count, Some(0));
        assert_eq!(out.diff["difference"], 0);
    }

    #[test]
    fn reports_signed_difference() {
        let a = body(b"ab");
        let b = body(b"abcdef");
        let out = LengthDiff.run(&a, &b, &BTreeMap::new()).unwrap();
        assert_eq!(out.change_count, Some(4));
        assert_eq!(out.diff["difference"], 4);
    }
}

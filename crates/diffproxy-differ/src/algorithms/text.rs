use diffproxy_core::{DecodedBody, DiffAlgorithm, DiffOutcome, Error, Result};
use similar::{ChangeTag, TextDiff as SimilarTextDiff};
use std::collections::BTreeMap;

/// Line-oriented diff over decoded text, per spec.md §4.4.
pub struct TextDiff;

impl DiffAlgorithm for TextDiff {
    fn name(&self) -> &'static str {
        "text"
    }

    fn requires_text(&self) -> bool {
        true
    }

    fn run(
        &self,
        a: &DecodedBody,
        b: &DecodedBody,
        _options: &BTreeMap<String, String>,
    ) -> Result<DiffOutcome> {
        let a_text = a
            .text
            .as_deref()
            .ok_or_else(|| Error::UndecodableContent("a has no decoded text".to_string()))?;
        let b_text = b
            .text
            .as_deref()
            .ok_or_else(|| Error::UndecodableContent("b has no decoded text".to_string()))?;

        let diff = SimilarTextDiff::from_lines(a_text, b_text);
        let mut change_count = 0u64;
        let mut ops = Vec::new();
        for change in diff.iter_all_changes() {
            let tag = match change.tag() {
                ChangeTag::Equal => "equal",
                ChangeTag::Delete => {
                    change_count += 1;
                    "delete"
                }
                ChangeTag::Insert => {
                    change_count += 1;
                    "insert"
                }
            };
            ops.push(serde_json::json!({
                "tag": tag,
                "value": change.value(),
            }));
        }

        Ok(DiffOutcome {
            change_count: Some(change_count),
            diff: serde_json::json!({ "ops": ops }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_body(s: &str) -> DecodedBody {
        DecodedBody {
            bytes: s.as_bytes().to_vec(),
            text: Some(s.to_string()),
            encoding: "utf-8".to_string(),
        }
    }

    #[test]
    fn identical_text_has_no_changes() {
        let a = text_body("one\ntwo\nthree\n");
        let out = TextDiff.run(&a, &a, &BTreeMap::new()).unwrap();
        assert_eq!(out.change_count, Some(0));
    }

    #[test]
    fn line_insertion_counts_as_one_change() {
        let a = text_body("one\ntwo\n");
        let b = text_body("one\ntwo\nthree\n");
        let out = TextDiff.run(&a, &b, &BTreeMap::new()).unwrap();
        assert_eq!(out.change_count, Some(1));
    }

    #[test]
    fn missing_text_is_undecodable_error() {
        let a = DecodedBody {
            bytes: b"abc".to_vec(),
            text: None,
            encoding: "utf-8".to_string(),
        };
        let b = text_body("abc");
        let err = TextDiff.run(&a, &b, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::UndecodableContent(_)));
    }

    #[test]
    fn diff_contains_null_bytes_in_text_without_panicking() {
        let a = text_body("one\x00two\n");
        let b = text_body("one\x00three\n");
        let out = TextDiff.run(&a, &b, &BTreeMap::new()).unwrap();
        assert!(out.change_count.unwrap() > 0);
    }
}

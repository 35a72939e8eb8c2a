use diffproxy_core::{DecodedBody, DiffAlgorithm, DiffOutcome, Error, Result};
use similar::{ChangeTag, TextDiff as SimilarTextDiff};
use std::collections::BTreeMap;

/// Splits HTML source into tag and text tokens: `<tag ...>` boundaries stay
/// whole, everything between them is split on whitespace. Coarser than a
/// real tokenizer, but enough to diff markup structure separately from
/// prose reflow.
fn tokenize(html: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = html.char_indices().peekable();
    let mut text_start = 0usize;

    while let Some(&(i, c)) = chars.peek() {
        if c == '<' {
            if i > text_start {
                for word in html[text_start..i].split_whitespace() {
                    tokens.push(word.to_string());
                }
            }
            let tag_start = i;
            let mut tag_end = html.len();
            while let Some(&(j, c2)) = chars.peek() {
                chars.next();
                if c2 == '>' {
                    tag_end = j + 1;
                    break;
                }
            }
            tokens.push(html[tag_start..tag_end].to_string());
            text_start = tag_end;
        } else {
            chars.next();
        }
    }
    if text_start < html.len() {
        for word in html[text_start..].split_whitespace() {
            tokens.push(word.to_string());
        }
    }
    tokens
}

/// Tag/whitespace token diff over decoded HTML, per spec.md §4.4.
pub struct HtmlTokenDiff;

impl DiffAlgorithm for HtmlTokenDiff {
    fn name(&self) -> &'static str {
        "html_token"
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

        let a_tokens = tokenize(a_text);
        let b_tokens = tokenize(b_text);
        let a_joined = a_tokens.join("\n");
        let b_joined = b_tokens.join("\n");

        let diff = SimilarTextDiff::from_lines(&a_joined, &b_joined);
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
                "token": change.value().trim_end_matches('\n'),
            }));
        }

        Ok(DiffOutcome {
            change_count: Some(change_count),
            diff: serde_json::json!({ "ops": ops }),
        })
    }
}

use diffproxy_core::{DecodedBody, DiffAlgorithm, DiffOutcome, Error, Result};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Extracts absolute, fragment-stripped, deduped `href` targets from an HTML
/// document. Relative hrefs are resolved against `base_url` when given;
/// `javascript:`/`mailto:` targets are dropped.
fn extract_links(html: &str, base_url: Option<&str>) -> BTreeSet<String> {
    let base = base_url.and_then(|u| url::Url::parse(u).ok());
    let doc = html_scraper::Html::parse_document(html);
    let sel = match html_scraper::Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return BTreeSet::new(),
    };

    let mut out = BTreeSet::new();
    for el in doc.select(&sel) {
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() {
            continue;
        }
        let href_lc = href.to_ascii_lowercase();
        if href_lc.starts_with("javascript:") || href_lc.starts_with("mailto:") {
            continue;
        }

        let abs = if let Ok(u) = url::Url::parse(href) {
            u
        } else if let Some(b) = &base {
            match b.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            continue;
        };

        let mut u = abs;
        u.set_fragment(None);
        out.insert(u.to_string());
    }
    out
}

/// Outgoing-link-set diff: what links disappeared, what links appeared.
pub struct LinksDiff;

impl DiffAlgorithm for LinksDiff {
    fn name(&self) -> &'static str {
        "links"
    }

    fn requires_text(&self) -> bool {
        true
    }

    fn run(
        &self,
        a: &DecodedBody,
        b: &DecodedBody,
        options: &BTreeMap<String, String>,
    ) -> Result<DiffOutcome> {
        let a_text = a
            .text
            .as_deref()
            .ok_or_else(|| Error::UndecodableContent("a has no decoded text".to_string()))?;
        let b_text = b
            .text
            .as_deref()
            .ok_or_else(|| Error::UndecodableContent("b has no decoded text".to_string()))?;

        let base = options.get("base_url").map(|s| s.as_str());
        let a_links = extract_links(a_text, base);
        let b_links = extract_links(b_text, base);

        let removed: Vec<&String> = a_links.difference(&b_links).collect();
        let added: Vec<&String> = b_links.difference(&a_links).collect();
        let change_count = (removed.len() + added.len()) as u64;

        Ok(DiffOutcome {
            change_count: Some(change_count),
            diff: serde_json::json!({
                "removed": removed,
                "added": added,
            }),
        })
    }
}

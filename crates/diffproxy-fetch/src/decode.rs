use diffproxy_core::{DecodedBody, Error, FetchResult, Result};
use encoding_rs::Encoding;

fn mime_is_textual_or_html(content_type: &str) -> bool {
    let lc = content_type.trim().to_ascii_lowercase();
    lc.starts_with("text/") || lc.contains("xhtml")
}

/// Extract the `charset=` parameter from a `Content-Type` header value.
/// Tolerant of whitespace and `CHARSET`/`charset` casing; returns `None`
/// (rather than erroring) on anything it can't parse cleanly, per spec.md
/// §4.2's resolution order.
fn parse_charset_param(content_type: &str) -> Option<String> {
    for part in content_type.split(';').skip(1) {
        let part = part.trim();
        let lower = part.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("charset=") {
            let value = part[part.len() - rest.len()..].trim();
            let value = value.trim_matches(['"', '\'']).trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Sniff a `<meta charset=...>` or `<meta http-equiv="Content-Type"
/// content="...; charset=...">` tag out of (presumed) HTML bytes.
fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let doc = html_scraper::Html::parse_document(&text);

    if let Ok(sel) = html_scraper::Selector::parse("meta[charset]") {
        if let Some(el) = doc.select(&sel).next() {
            if let Some(v) = el.value().attr("charset") {
                let v = v.trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }

    if let Ok(sel) = html_scraper::Selector::parse("meta[http-equiv]") {
        for el in doc.select(&sel) {
            let equiv = el.value().attr("http-equiv").unwrap_or("");
            if !equiv.eq_ignore_ascii_case("content-type") {
                continue;
            }
            if let Some(content) = el.value().attr("content") {
                if let Some(charset) = parse_charset_param(&format!(";{content}")) {
                    return Some(charset);
                }
            }
        }
    }

    None
}

/// Resolve the charset to decode `body` with, following spec.md §4.2's
/// order: explicit header label, then HTML meta-tag sniffing, then
/// statistical detection, defaulting to UTF-8 when nothing else applies.
fn resolve_encoding(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some(ct) = content_type {
        if let Some(label) = parse_charset_param(&format!(";{ct}")) {
            if let Some(enc) = Encoding::for_label(label.as_bytes()) {
                return enc;
            }
        }
    }

    let textual_hint = content_type.map(mime_is_textual_or_html).unwrap_or(true);
    if textual_hint {
        if let Some(label) = sniff_meta_charset(body) {
            if let Some(enc) = Encoding::for_label(label.as_bytes()) {
                return enc;
            }
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    detector.guess(None, true)
}

/// `decode(FetchResult) -> DecodedBody | UndecodableContent`, spec.md §4.2.
pub fn decode(result: &FetchResult) -> Result<DecodedBody> {
    let content_type = result.headers.get("content-type").map(|s| s.as_str());

    if result.body.is_empty() {
        return Ok(DecodedBody {
            bytes: Vec::new(),
            text: Some(String::new()),
            encoding: "utf-8".to_string(),
        });
    }

    let textual = match content_type {
        Some(ct) => mime_is_textual_or_html(ct),
        None => true,
    };
    if !textual {
        return Err(Error::UndecodableContent(format!(
            "content-type {} is not decodable as text",
            content_type.unwrap_or("unknown")
        )));
    }

    let encoding = resolve_encoding(content_type, &result.body);
    let (text, _, _had_errors) = encoding.decode(&result.body);

    Ok(DecodedBody {
        bytes: result.body.clone(),
        text: Some(text.into_owned()),
        encoding: encoding.name().to_ascii_lowercase(),
    })
}

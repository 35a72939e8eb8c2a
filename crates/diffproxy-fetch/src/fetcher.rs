use diffproxy_core::{Error, FetchResult, FetchSpec, Result, UpstreamFetcher};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

fn content_type_for_extension(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        _ => "text/html",
    }
}

fn has_memento_header(headers: &BTreeMap<String, String>) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case("memento-datetime"))
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("diffproxy/0.1")
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::NetworkUnreachable(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_file(spec: &FetchSpec) -> Result<FetchResult> {
        if !spec.allow_file_scheme {
            return Err(Error::DisallowedScheme("file".to_string()));
        }
        let url = url::Url::parse(&spec.url)
            .map_err(|e| Error::InvalidRequest(format!("invalid url: {e}")))?;
        let path = url
            .to_file_path()
            .map_err(|_| Error::InvalidRequest("invalid file:// url".to_string()))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::UpstreamFailure {
                status: 404,
                message: format!("local file read failed: {e}"),
            })?;
        if bytes.len() as u64 > spec.max_bytes {
            return Err(Error::BodyTooLarge(format!(
                "{} bytes exceeds cap of {} bytes",
                bytes.len(),
                spec.max_bytes
            )));
        }

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            content_type_for_extension(&path).to_string(),
        );

        Ok(FetchResult {
            url: spec.url.clone(),
            status: 200,
            headers,
            body: bytes,
            from_archive: false,
            truncated: false,
        })
    }

    async fn fetch_http(&self, spec: &FetchSpec) -> Result<FetchResult> {
        // spec.md §9 "Headers always honored": any header the client named in
        // `pass_headers` is forwarded as-is, including Authorization/Cookie —
        // the orchestrator trusts the caller's own choice of what to send to
        // a URL the caller also chose.
        let mut rb = self.client.get(&spec.url).timeout(spec.timeout);
        for (name, value) in &spec.forwarded_headers {
            rb = rb.header(name.as_str(), value.as_str());
        }

        let resp = rb.send().await.map_err(classify_send_error)?;
        let status = resp.status().as_u16();

        let mut headers = BTreeMap::new();
        for (k, v) in resp.headers().iter() {
            if let Ok(s) = v.to_str() {
                headers.insert(k.as_str().to_ascii_lowercase(), s.to_string());
            }
        }
        let from_archive = has_memento_header(&headers);

        let declared_len = headers
            .get("content-length")
            .and_then(|v| v.parse::<u64>().ok());

        let body = match declared_len {
            Some(len) if len <= spec.max_bytes => {
                read_exactly(resp, len).await?
            }
            _ => read_up_to_cap(resp, spec.max_bytes).await?,
        };

        if !(200..300).contains(&status) && !from_archive {
            return Err(Error::UpstreamFailure {
                status,
                message: format!("upstream returned HTTP {status}"),
            });
        }

        Ok(FetchResult {
            url: spec.url.clone(),
            status,
            headers,
            body,
            from_archive,
            truncated: false,
        })
    }
}

fn classify_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::UpstreamTimeout(e.to_string())
    } else {
        Error::NetworkUnreachable(e.to_string())
    }
}

/// Read exactly `len` bytes from the response body, ignoring whatever the
/// server does afterward. Per spec.md §4.1: "terminate even if the server
/// lies and tries to send more".
async fn read_exactly(resp: reqwest::Response, len: u64) -> Result<Vec<u8>> {
    use futures_util::StreamExt;
    let want = len as usize;
    let mut out = Vec::with_capacity(want.min(1 << 20));
    let mut stream = resp.bytes_stream();
    while out.len() < want {
        let Some(chunk) = stream.next().await else {
            break;
        };
        let chunk = chunk.map_err(classify_send_error)?;
        let remaining = want - out.len();
        if chunk.len() > remaining {
            out.extend_from_slice(&chunk[..remaining]);
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Read until `cap + 1` bytes to detect an over-cap body, per spec.md §4.1.
async fn read_up_to_cap(resp: reqwest::Response, cap: u64) -> Result<Vec<u8>> {
    use futures_util::StreamExt;
    let cap = cap as usize;
    let mut out = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify_send_error)?;
        out.extend_from_slice(&chunk);
        if out.len() > cap {
            return Err(Error::BodyTooLarge(format!(
                "body exceeded cap of {cap} bytes"
            )));
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult> {
        let url = url::Url::parse(&spec.url)
            .map_err(|e| Error::InvalidRequest(format!("invalid url: {e}")))?;

        let result = match url.scheme() {
            "http" | "https" => self.fetch_http(spec).await?,
            "file" => Self::fetch_file(spec).await?,
            other => return Err(Error::DisallowedScheme(other.to_string())),
        };

        if let Some(expected) = &spec.expected_hash {
            let mut hasher = Sha256::new();
            hasher.update(&result.body);
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::HashMismatch(format!(
                    "expected hash {expected} but body hashed to {actual}"
                )));
            }
        }

        Ok(result)
    }
}

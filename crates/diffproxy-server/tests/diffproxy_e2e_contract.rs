//! End-to-end contract tests against the real compiled binary: the server
//! is spawned as a child process (so `diffproxy worker` self-reexec works
//! exactly as it does in production) and driven over real HTTP.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

struct Server {
    child: Child,
    base_url: String,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_server(extra_env: &[(&str, &str)]) -> Server {
    let bin = assert_cmd::cargo::cargo_bin!("diffproxy");
    let mut cmd = Command::new(bin);
    cmd.args(["serve", "--bind", "127.0.0.1:0"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn diffproxy serve");

    let stderr = child.stderr.take().expect("stderr pipe");
    let mut reader = BufReader::new(stderr);
    let mut addr = None;
    for _ in 0..50 {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        if let Some(rest) = line.trim().strip_prefix("diffproxy: listening on ") {
            addr = Some(rest.to_string());
            break;
        }
    }
    let addr = addr.expect("server printed its bound address");

    Server {
        child,
        base_url: format!("http://{addr}"),
    }
}

async fn wait_ready(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client
            .get(format!("{base_url}/healthcheck"))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server never became ready");
}

#[tokio::test]
async fn healthcheck_and_version_contract() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/healthcheck", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    let version = client
        .get(format!("{}/", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(version.status(), 200);
    let body: serde_json::Value = version.json().await.unwrap();
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn identical_empty_local_files_diff_to_zero_changes() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.txt");
    std::fs::write(&path, b"").unwrap();
    let file_url = format!("file://{}", path.display());
    let empty_sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[
            ("a", file_url.as_str()),
            ("b", file_url.as_str()),
            ("a_hash", empty_sha256),
            ("b_hash", empty_sha256),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["change_count"].as_u64(), Some(0));
}

#[tokio::test]
async fn bad_hash_is_rejected_with_hash_in_the_message() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.txt");
    std::fs::write(&path, b"").unwrap();
    let file_url = format!("file://{}", path.display());
    let wrong_hash = "f3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", file_url.as_str()), ("b", file_url.as_str()), ("a_hash", wrong_hash)])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("hash"));
}

#[tokio::test]
async fn file_scheme_is_rejected_in_production() {
    let server = spawn_server(&[("WEB_MONITORING_APP_ENV", "production")]);
    wait_ready(&server.base_url).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", "file:///etc/hostname"), ("b", "file:///etc/hostname")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn unknown_algorithm_is_404() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/not_a_real_algorithm", server.base_url))
        .query(&[("a", "file:///etc/hostname"), ("b", "file:///etc/hostname")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn missing_url_param_is_400() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", "file:///etc/hostname")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn repeat_request_with_matching_if_none_match_returns_304() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello").unwrap();
    let file_url = format!("file://{}", path.display());

    let client = reqwest::Client::new();
    let cold = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", file_url.as_str()), ("b", file_url.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(cold.status(), 200);
    let etag = cold
        .headers()
        .get(reqwest::header::ETAG)
        .expect("cold response carries an ETag")
        .to_str()
        .unwrap()
        .to_string();

    let warm = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", file_url.as_str()), ("b", file_url.as_str())])
        .header(reqwest::header::IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(warm.status(), 304);
    assert_eq!(
        warm.headers().get(reqwest::header::ETAG).unwrap().to_str().unwrap(),
        etag
    );
    assert_eq!(warm.content_length(), Some(0));
}

#[tokio::test]
async fn cors_wildcard_echoes_origin_with_credentials() {
    let server = spawn_server(&[]);
    wait_ready(&server.base_url).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello").unwrap();
    let file_url = format!("file://{}", path.display());

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", file_url.as_str()), ("b", file_url.as_str())])
        .header(reqwest::header::ORIGIN, "http://test.com")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "http://test.com"
    );
    assert_eq!(
        resp.headers().get("access-control-allow-credentials").unwrap(),
        "true"
    );
}

#[tokio::test]
async fn cors_allowlist_echoes_member_origin() {
    let server = spawn_server(&[("DIFFPROXY_CORS_ALLOW_ORIGIN", "one.com,two.com,three.com")]);
    wait_ready(&server.base_url).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello").unwrap();
    let file_url = format!("file://{}", path.display());

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/identical_bytes", server.base_url))
        .query(&[("a", file_url.as_str()), ("b", file_url.as_str())])
        .header(reqwest::header::ORIGIN, "http://two.com")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "http://two.com"
    );
}

use crate::protocol::{read_framed, write_framed};
use crate::registry::Registry;
use async_trait::async_trait;
use diffproxy_core::{DiffJob, DiffOutcome, Error, Result};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;

/// How much trailing stderr to keep per worker for crash diagnostics. A
/// long-lived worker can write unbounded stderr over its lifetime; only the
/// tail matters once it crashes, so older bytes are dropped as new ones
/// arrive rather than buffering the whole thing.
const STDERR_TAIL_CAP: usize = 8192;

/// One frame sent from the parent to a worker process.
#[derive(Debug, Serialize, Deserialize)]
pub enum WorkerRequest {
    Diff(DiffJob),
    Shutdown,
}

/// One frame sent back. `Failed` is a well-formed diff failure (unknown
/// algorithm, undecodable content, ...) and does not indicate the worker
/// itself is unhealthy; only an IO error, EOF, or malformed frame does.
#[derive(Debug, Serialize, Deserialize)]
pub enum WorkerResponse {
    Done(DiffOutcome),
    Failed(String),
}

/// The child-process entry point: `diffproxy --worker` dispatches here
/// instead of starting the HTTP server. Reads `WorkerRequest` frames from
/// stdin and writes `WorkerResponse` frames to stdout until stdin closes
/// or a `Shutdown` frame arrives, per spec.md §4.3/§9's isolated-process
/// design.
pub async fn run_worker_loop() -> Result<()> {
    let registry = Registry::new();
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut writer = BufWriter::new(stdout);

    loop {
        let request: Option<WorkerRequest> = read_framed(&mut reader).await?;
        let request = match request {
            Some(r) => r,
            None => break,
        };

        match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Diff(job) => {
                let response = match registry.run(&job.algorithm, &job.a, &job.b, &job.options) {
                    Ok(outcome) => WorkerResponse::Done(outcome),
                    Err(e) => WorkerResponse::Failed(e.to_string()),
                };
                write_framed(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

/// A single live connection to a diff worker, abstracted so the pool can be
/// unit-tested without spawning real OS processes.
#[async_trait]
pub trait WorkerConn: Send {
    async fn submit(&mut self, job: DiffJob) -> Result<DiffOutcome>;
    /// Best-effort graceful shutdown; the pool still drops/kills on error.
    async fn shutdown(&mut self);
}

/// Creates worker connections. `ProcessWorkerSpawner` is the production
/// implementation (self-reexec subprocess); tests substitute an in-process
/// fake that can be scripted to fail on demand, mirroring the original's
/// `BrokenProcessPoolExecutor` test double.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn WorkerConn>>;
}

struct ProcessWorkerConn {
    child: Child,
    writer: BufWriter<tokio::process::ChildStdin>,
    reader: BufReader<tokio::process::ChildStdout>,
    stderr_tail: Arc<AsyncMutex<Vec<u8>>>,
}

impl ProcessWorkerConn {
    /// Appends the worker's captured stderr tail to a broken-pool error
    /// message, so a crash isn't a silent respawn — grounded in the
    /// Playwright render subprocess's stdout/stderr capture-on-failure
    /// pattern, adapted from one-shot output collection to a running tail.
    async fn broken(&self, reason: impl Into<String>) -> Error {
        let tail = self.stderr_tail.lock().await;
        worker_pool_broken_with_stderr(reason.into(), &tail)
    }
}

fn worker_pool_broken_with_stderr(reason: String, stderr_tail: &[u8]) -> Error {
    let stderr = String::from_utf8_lossy(stderr_tail).trim().to_string();
    if stderr.is_empty() {
        Error::WorkerPoolBroken(reason)
    } else {
        Error::WorkerPoolBroken(format!("{reason}; worker stderr: {stderr}"))
    }
}

#[async_trait]
impl WorkerConn for ProcessWorkerConn {
    async fn submit(&mut self, job: DiffJob) -> Result<DiffOutcome> {
        if let Err(e) = write_framed(&mut self.writer, &WorkerRequest::Diff(job)).await {
            return Err(self.broken(format!("failed to write request to worker: {e}")).await);
        }
        match read_framed(&mut self.reader).await {
            Ok(Some(WorkerResponse::Done(outcome))) => Ok(outcome),
            Ok(Some(WorkerResponse::Failed(message))) => Err(parse_worker_failure(&message)),
            Ok(None) => Err(self.broken("worker closed its output before responding").await),
            Err(e) => Err(self.broken(format!("worker produced a malformed response frame: {e}")).await),
        }
    }

    async fn shutdown(&mut self) {
        let _ = write_framed(&mut self.writer, &WorkerRequest::Shutdown).await;
        let _ = self.child.kill().await;
    }
}

/// `WorkerResponse::Failed` only carries the rendered `Display` string, so
/// most diff-level failures surface as `UpstreamFailure`-shaped messages
/// rather than their original variant. This is acceptable: the pool only
/// needs to distinguish "the worker answered" (any `Failed`) from "the
/// worker is gone" (`WorkerPoolBroken`), and the orchestrator only ever
/// logs or forwards this message, it doesn't branch on the error kind.
fn parse_worker_failure(message: &str) -> Error {
    Error::UpstreamFailure {
        status: 500,
        message: message.to_string(),
    }
}

/// Spawns `diffproxy --worker` (the binary re-invoking itself) as a child
/// process and wires up its stdio as a framed `WorkerConn`. Grounded in the
/// one-shot subprocess-with-piped-stdio pattern used for Playwright
/// rendering, generalized here to a long-lived process with many requests
/// instead of one argument-in/result-out call.
pub struct ProcessWorkerSpawner {
    exe: std::path::PathBuf,
    worker_flag: String,
}

impl ProcessWorkerSpawner {
    pub fn new(worker_flag: impl Into<String>) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| Error::WorkerPoolBroken(format!("cannot locate own executable: {e}")))?;
        Ok(Self {
            exe,
            worker_flag: worker_flag.into(),
        })
    }
}

/// Continuously reads a worker's stderr into a shared buffer, keeping only
/// the last `STDERR_TAIL_CAP` bytes, until the pipe closes (the worker
/// exited). Runs for the whole lifetime of the worker, not just around one
/// submit, since a crash can happen between requests too.
async fn drain_stderr_tail<R>(mut stderr: R, tail: Arc<AsyncMutex<Vec<u8>>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut buf = tail.lock().await;
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > STDERR_TAIL_CAP {
            let drop = buf.len() - STDERR_TAIL_CAP;
            buf.drain(..drop);
        }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessWorkerSpawner {
    async fn spawn(&self) -> Result<Box<dyn WorkerConn>> {
        let mut child = Command::new(&self.exe)
            .arg(&self.worker_flag)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::WorkerPoolBroken(format!("failed to spawn diff worker: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::WorkerPoolBroken("worker has no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerPoolBroken("worker has no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::WorkerPoolBroken("worker has no stderr pipe".to_string()))?;

        let stderr_tail = Arc::new(AsyncMutex::new(Vec::new()));
        tokio::spawn(drain_stderr_tail(stderr, stderr_tail.clone()));

        Ok(Box::new(ProcessWorkerConn {
            child,
            writer: BufWriter::new(stdin),
            reader: BufReader::new(stdout),
            stderr_tail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffproxy_core::DecodedBody;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeWorkerConn {
        fail_remaining: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerConn for FakeWorkerConn {
        async fn submit(&mut self, job: DiffJob) -> Result<DiffOutcome> {
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::WorkerPoolBroken("fake worker crashed".to_string()));
            }
            let registry = Registry::new();
            registry.run(&job.algorithm, &job.a, &job.b, &job.options)
        }

        async fn shutdown(&mut self) {}
    }

    struct FakeSpawner {
        fail_remaining: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerSpawner for FakeSpawner {
        async fn spawn(&self) -> Result<Box<dyn WorkerConn>> {
            Ok(Box::new(FakeWorkerConn {
                fail_remaining: self.fail_remaining.clone(),
            }))
        }
    }

    fn text_job() -> DiffJob {
        DiffJob {
            algorithm: "identical_bytes".to_string(),
            a: DecodedBody {
                bytes: b"x".to_vec(),
                text: Some("x".to_string()),
                encoding: "utf-8".to_string(),
            },
            b: DecodedBody {
                bytes: b"x".to_vec(),
                text: Some("x".to_string()),
                encoding: "utf-8".to_string(),
            },
            options: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn fake_spawner_reports_worker_pool_broken_on_scripted_failure() {
        let spawner = FakeSpawner {
            fail_remaining: Arc::new(AtomicUsize::new(1)),
        };
        let mut conn = spawner.spawn().await.unwrap();
        let err = conn.submit(text_job()).await.unwrap_err();
        assert!(matches!(err, Error::WorkerPoolBroken(_)));
    }

    #[tokio::test]
    async fn fake_spawner_succeeds_once_failures_are_exhausted() {
        let spawner = FakeSpawner {
            fail_remaining: Arc::new(AtomicUsize::new(0)),
        };
        let mut conn = spawner.spawn().await.unwrap();
        let outcome = conn.submit(text_job()).await.unwrap();
        assert_eq!(outcome.change_count, Some(0));
    }

    #[tokio::test]
    async fn drain_stderr_tail_caps_to_the_most_recent_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let tail = Arc::new(AsyncMutex::new(Vec::new()));
        let drain = tokio::spawn(drain_stderr_tail(client, tail.clone()));

        tokio::io::AsyncWriteExt::write_all(&mut server, &[b'a'; STDERR_TAIL_CAP]).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut server, b"tail-marker").await.unwrap();
        drop(server);
        drain.await.unwrap();

        let buf = tail.lock().await;
        assert!(buf.len() <= STDERR_TAIL_CAP);
        assert!(String::from_utf8_lossy(&buf).ends_with("tail-marker"));
    }

    #[test]
    fn broken_error_includes_captured_stderr() {
        let err = worker_pool_broken_with_stderr(
            "worker exited".to_string(),
            b"panicked at worker.rs:1",
        );
        assert!(err.to_string().contains("worker exited"));
        assert!(err.to_string().contains("panicked at worker.rs:1"));
    }

    #[test]
    fn broken_error_omits_stderr_suffix_when_nothing_was_captured() {
        let err = worker_pool_broken_with_stderr("worker exited".to_string(), b"");
        assert_eq!(err.to_string(), Error::WorkerPoolBroken("worker exited".to_string()).to_string());
    }
}

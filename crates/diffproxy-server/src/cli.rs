use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "diffproxy")]
#[command(about = "Networked diffing gateway: fetch two resources, diff them, cache the answer.")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP gateway (the default when no subcommand is given).
    Serve(ServeCmd),
    /// Internal: run as an isolated diff worker, speaking the framed
    /// protocol over stdin/stdout. Not part of the public CLI surface;
    /// `diffproxy` re-execs itself with this subcommand to spawn workers.
    #[command(hide = true)]
    Worker,
    /// Print version info.
    Version,
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeCmd {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "DIFFPROXY_BIND")]
    pub bind: Option<String>,
    /// Deployment mode; `production` rejects `file://` fetches.
    #[arg(long, env = "WEB_MONITORING_APP_ENV")]
    pub app_env: Option<String>,
    /// `*` or a comma-separated list of allowed CORS origins.
    #[arg(long, env = "DIFFPROXY_CORS_ALLOW_ORIGIN")]
    pub cors_allow_origin: Option<String>,
    /// Per-resource fetch size cap, in bytes.
    #[arg(long, env = "DIFFPROXY_MAX_BODY_BYTES")]
    pub max_body_bytes: Option<u64>,
    /// Per-resource fetch timeout, in milliseconds.
    #[arg(long, env = "DIFFPROXY_FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,
    /// Number of isolated diff worker processes in the pool.
    #[arg(long, env = "DIFFPROXY_WORKER_COUNT")]
    pub workers: Option<u64>,
    /// Suppress process exit after the diff worker pool is repeatedly
    /// broken, so an external supervisor can handle restart instead.
    #[arg(long, env = "RESTART_BROKEN_DIFFER", action = clap::ArgAction::SetTrue)]
    pub restart_broken_differ: bool,
}

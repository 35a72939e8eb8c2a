/// Truthy-string matching for boolean env vars, matching the teacher's
/// `WEBPIPE_ALLOW_UNSAFE_HEADERS`-style checks: trimmed, lowercased,
/// accepting `1`/`true`/`yes`/`on`.
fn env_truthy(key: &str) -> bool {
    matches!(
        std::env::var(key)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Server-wide configuration, read once at startup from CLI flags (which
/// themselves fall back to environment variables via clap's `env`
/// feature) and handed down through `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// `production` disables `file://` fetches (spec.md §4.1/§6).
    pub app_env: String,
    /// `*` or a comma-separated allowlist (spec.md §4.6).
    pub cors_allow_origin: String,
    pub max_body_bytes: u64,
    pub fetch_timeout_ms: u64,
    /// Size of the isolated diff worker process pool (spec.md §4.3/§9).
    pub worker_count: u64,
    /// Suppresses the exit(10) shutdown after repeated worker pool
    /// breakage, for use under an external process supervisor.
    pub restart_broken_differ: bool,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn from_env_and_cli(cli: &crate::cli::ServeCmd) -> Self {
        Self {
            bind_addr: cli
                .bind
                .clone()
                .unwrap_or_else(|| env_string("DIFFPROXY_BIND", "127.0.0.1:8080")),
            app_env: cli
                .app_env
                .clone()
                .unwrap_or_else(|| env_string("WEB_MONITORING_APP_ENV", "development")),
            cors_allow_origin: cli
                .cors_allow_origin
                .clone()
                .unwrap_or_else(|| env_string("DIFFPROXY_CORS_ALLOW_ORIGIN", "*")),
            max_body_bytes: cli
                .max_body_bytes
                .unwrap_or_else(|| env_u64("DIFFPROXY_MAX_BODY_BYTES", 100 * 1024)),
            fetch_timeout_ms: cli
                .fetch_timeout_ms
                .unwrap_or_else(|| env_u64("DIFFPROXY_FETCH_TIMEOUT_MS", 30_000)),
            worker_count: cli
                .workers
                .unwrap_or_else(|| env_u64("DIFFPROXY_WORKER_COUNT", 4))
                .max(1),
            restart_broken_differ: cli.restart_broken_differ
                || env_truthy("RESTART_BROKEN_DIFFER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_production_is_case_insensitive() {
        let cfg = Config {
            bind_addr: "127.0.0.1:0".to_string(),
            app_env: "PRODUCTION".to_string(),
            cors_allow_origin: "*".to_string(),
            max_body_bytes: 1024,
            fetch_timeout_ms: 1000,
            worker_count: 1,
            restart_broken_differ: false,
        };
        assert!(cfg.is_production());
    }

    #[test]
    fn non_production_env_allows_file_scheme() {
        let cfg = Config {
            bind_addr: "127.0.0.1:0".to_string(),
            app_env: "development".to_string(),
            cors_allow_origin: "*".to_string(),
            max_body_bytes: 1024,
            fetch_timeout_ms: 1000,
            worker_count: 1,
            restart_broken_differ: false,
        };
        assert!(!cfg.is_production());
    }
}

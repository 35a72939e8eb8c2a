use crate::config::Config;
use diffproxy_core::UpstreamFetcher;
use diffproxy_differ::{DiffWorkerPool, Registry};
use std::sync::Arc;

/// Everything a request handler needs, shared across the whole server via
/// `axum::extract::State`. Built once in `main` (the teacher's shape for
/// its env-driven toggles, here collected into one struct instead of ad
/// hoc `std::env::var` calls scattered through handlers).
pub struct AppState {
    pub config: Config,
    pub fetcher: Arc<dyn UpstreamFetcher>,
    pub pool: Arc<DiffWorkerPool>,
    pub registry: Arc<Registry>,
}

mod cli;
mod config;
mod cors;
mod etag;
mod routes;
mod state;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use cli::{Cli, Commands, ServeCmd};
use config::Config;
use diffproxy_differ::{DiffWorkerPool, ProcessWorkerSpawner, Registry};
use diffproxy_fetch::HttpFetcher;
use state::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve(ServeCmd::default())) {
        Commands::Worker => {
            diffproxy_differ::run_worker_loop()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Version => {
            println!("diffproxy {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Serve(args) => {
            serve(args).await?;
        }
    }

    Ok(())
}

async fn serve(args: ServeCmd) -> Result<()> {
    let config = Config::from_env_and_cli(&args);
    eprintln!(
        "diffproxy: starting on {} (app_env={})",
        config.bind_addr, config.app_env
    );

    let spawner = Arc::new(
        ProcessWorkerSpawner::new("worker")
            .map_err(|e| anyhow::anyhow!("failed to prepare diff worker spawner: {e}"))?,
    );
    let fetcher = HttpFetcher::new()
        .map_err(|e| anyhow::anyhow!("failed to build upstream HTTP client: {e}"))?;
    let state = Arc::new(AppState {
        fetcher: Arc::new(fetcher),
        pool: Arc::new(DiffWorkerPool::new(spawner, config.worker_count as usize)),
        registry: Arc::new(Registry::new()),
        config,
    });

    let app = Router::new()
        .route("/", get(routes::version))
        .route("/healthcheck", get(routes::healthcheck))
        .route("/:algorithm", get(routes::diff))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    eprintln!("diffproxy: listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

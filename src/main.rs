//! roadmap-sync binary: loads settings, runs the worker and serves the
//! control API until Ctrl-C.

use clap::Parser;
use roadmap_sync_lib::config::{AppConfig, DEFAULT_CONFIG_PATH};
use roadmap_sync_lib::db;
use roadmap_sync_lib::error::AppError;
use roadmap_sync_lib::models::repository;
use roadmap_sync_lib::services::control_auth::ApiToken;
use roadmap_sync_lib::services::control_server::{self, ControlState};
use roadmap_sync_lib::services::{
    GitLabClient, GitLabContentSource, GitLabTracker, RepositorySources, SyncService, SyncWorker,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Import roadmap content and sync feature requests with GitLab.
#[derive(Parser, Debug)]
#[command(name = "roadmap-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON). Defaults to ./roadmap-sync.json if present.
    #[arg(short = 'c', long = "config", env = "ROADMAP_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Serve the control API without starting the background worker.
    #[arg(long)]
    no_worker: bool,

    /// Address for the control API, overriding `server.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// An explicit `--config` must exist; the default path is optional.
fn load_config(explicit: Option<PathBuf>) -> Result<AppConfig, AppError> {
    let mut config = match explicit {
        Some(path) => AppConfig::load(&path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                AppConfig::load(&default_path)?
            } else {
                log::info!("No {} found, using defaults and environment", DEFAULT_CONFIG_PATH);
                AppConfig::default()
            }
        }
    };

    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = load_config(cli.config)?;

    let pool = db::initialize(&config.database_path).await?;
    log::info!("Database ready at {}", config.database_path.display());

    for repo in &config.repositories {
        let seeded = repository::upsert_repository(&pool, repo).await?;
        log::debug!("Repository '{}' registered as {}", seeded.name, seeded.id);
    }

    let tracker = GitLabTracker::new(
        GitLabClient::new(config.tracker_client_config())?,
        config.tracker.project.clone(),
        config.retry.clone(),
    );

    let gitlab_content = match config.content_client_config() {
        Some(client_config) => Some(GitLabContentSource::new(
            GitLabClient::new(client_config)?,
            config.retry.clone(),
        )),
        None => None,
    };

    let service = SyncService::new(
        pool,
        Arc::new(tracker),
        Arc::new(RepositorySources::new(gitlab_content)),
    );
    let worker = SyncWorker::new(service, config.sync.clone());

    if config.sync.autostart && !cli.no_worker {
        worker.start();
    } else {
        log::info!("Worker not started; use POST /api/worker/start");
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Shutdown requested"),
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let router = control_server::build_router(
        ControlState {
            worker: worker.clone(),
        },
        ApiToken::new(config.server.api_token.clone()),
    );
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let served = control_server::serve(&bind, router, cancel).await;

    worker.stop();
    worker.join().await;

    served
}

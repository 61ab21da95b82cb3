//! Lintel - hierarchical permission reconciler

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lintel::{
    config::{Args, Command},
    controller::{spawn_controller, Controller},
    directory::HttpDirectoryClient,
    nats::NatsWatcher,
    reconciler::Reconciler,
    store::SqliteStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lintel={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Lintel - permission reconciler");
    info!("======================================");
    info!("Command: {:?}", args.command());
    info!("Database: {}", args.database_path.display());
    info!("Directory service: {}", args.directory_url);
    info!("NATS: {} (subject {})", args.nats.nats_url, args.directory_subject);
    match args.base_directory_id {
        Some(base) => info!("Base directory: {}", base),
        None => info!("Base directory: whole tree"),
    }
    info!("Workers: {} (queue {})", args.worker_count, args.queue_size);
    info!("Resync interval: {}s", args.resync_interval_secs);
    info!("======================================");

    let store = SqliteStore::open(&args.database_path)
        .with_context(|| format!("opening database {}", args.database_path.display()))?;

    if args.command() == Command::Migrate {
        let version = store.schema_version().await?;
        info!("Database schema at v{}", version);
        return Ok(());
    }

    let directory = HttpDirectoryClient::new(args.directory_config())?;
    let engine = Arc::new(Reconciler::new(
        Arc::new(store),
        Arc::new(directory),
        args.reconciler_config(),
    ));

    let watcher = match NatsWatcher::connect(&args.nats, "lintel").await {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let controller = Controller::new(engine, Arc::new(watcher), args.controller_config());
    let (controller, mut handle) = spawn_controller(controller);

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            controller.shutdown();
            handle.await
        }
        result = &mut handle => result,
    };

    match result {
        Ok(Ok(())) => {
            info!("Lintel stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Controller error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Controller task panicked: {}", e);
            std::process::exit(1);
        }
    }
}

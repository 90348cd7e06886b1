//! Herald Announcement Player (herald-ap) - Main entry point
//!
//! Loads the persisted bill and enable flag, runs the Controller against the
//! system audio device and wall clock, and serves the HTTP command adapter.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use herald_ap::api::{self, AppContext};
use herald_ap::config::{Config, Overrides};
use herald_ap::db::{initialize_database, open_pool, SettingsStore};
use herald_ap::fetch::HttpFetcher;
use herald_ap::playback::{Controller, CpalPlayer, Dependencies};
use herald_ap::schedule::ClockScheduler;
use herald_ap::Error;
use herald_common::config::{LoggingConfig, TomlConfig};
use herald_common::Bill;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for herald-ap
#[derive(Parser, Debug)]
#[command(name = "herald-ap")]
#[command(about = "Scheduled announcement player")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "HERALD_PORT")]
    port: Option<u16>,

    /// Path to SQLite database (overrides config file)
    #[arg(short, long, env = "HERALD_DATABASE")]
    database: Option<PathBuf>,

    /// Directory holding audio files (overrides config file)
    #[arg(short, long, env = "HERALD_FILES_PATH")]
    files_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let config = Config::resolve(
        toml,
        Overrides {
            port: args.port,
            database_path: args.database,
            files_path: args.files_path,
        },
    );

    init_logging(&config.logging)?;

    info!(
        "Starting herald-ap v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );
    info!("Database: {}", config.database_path.display());
    info!("Files: {}", config.files_path.display());

    std::fs::create_dir_all(&config.files_path).with_context(|| {
        format!("Failed to create files directory {}", config.files_path.display())
    })?;

    let pool = open_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    initialize_database(&pool)
        .await
        .context("Failed to initialize database")?;
    let settings = SettingsStore::new(pool);

    let bill = load_bill(&settings).await;
    let enabled = settings.load_enable().await.context("Failed to load enable flag")?;

    let fetcher = HttpFetcher::new(config.fetch.clone()).context("Failed to build fetcher")?;
    let controller = Controller::new(
        Dependencies {
            player: Arc::new(CpalPlayer::new()),
            scheduler: Arc::new(ClockScheduler::new()),
            fetcher: Arc::new(fetcher),
            settings,
        },
        config.controller(),
        bill,
        enabled,
    )
    .context("Failed to build controller")?;

    if enabled {
        controller.start().await.context("Failed to start controller")?;
    } else {
        warn!("Appliance is disabled; waiting for an enable command");
    }

    let ctx = AppContext {
        controller: controller.clone(),
        port: config.port,
    };
    let served = api::run(ctx, shutdown_signal()).await;

    match controller.shutdown().await {
        Ok(()) | Err(Error::AlreadyStopped) => {}
        Err(e) => error!("Controller shutdown failed: {}", e),
    }
    served.context("HTTP server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Persisted bill, or the empty bill if it is missing or invalid
async fn load_bill(settings: &SettingsStore) -> Bill {
    let json = match settings.load_bill_json().await {
        Ok(Some(json)) => json,
        Ok(None) => return Bill::empty(),
        Err(e) => {
            error!("Failed to read persisted bill: {}", e);
            return Bill::empty();
        }
    };

    let parsed = Bill::from_json(&json).and_then(|mut bill| bill.validate().map(|_| bill));
    match parsed {
        Ok(bill) => {
            info!("Loaded bill '{}' ({} slots)", bill.name, bill.slots.len());
            bill
        }
        Err(e) => {
            error!("Persisted bill is invalid, using the empty bill: {}", e);
            Bill::empty()
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));

    let (stderr_layer, file_layer) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            (None, Some(layer))
        }
        None => (Some(tracing_subscriber::fmt::layer()), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

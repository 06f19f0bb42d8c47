//! QMS server - Main entry point
//!
//! Resolves the root folder, opens (or creates) the database, and serves the
//! HTTP/JSON API until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use qms_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig, DEFAULT_HOST, DEFAULT_PORT};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use qms_server::{build_router, db, AppState};

const MODULE_NAME: &str = "qms-server";

/// Command-line arguments for qms-server
#[derive(Parser, Debug)]
#[command(name = "qms-server")]
#[command(about = "Quality management system backend")]
#[command(version)]
struct Args {
    /// Address to bind (overrides `[server] host`)
    #[arg(long, env = "QMS_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides `[server] port`)
    #[arg(short, long, env = "QMS_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and backups
    #[arg(short, long, env = "QMS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,
}

/// Filter used when neither `RUST_LOG` nor `[logging] level` is usable
const DEFAULT_LOG_FILTER: &str = "qms_server=info,qms_common=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The config file decides the log level, so it is read under a
    // temporary console subscriber
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_max_level(Level::INFO).finish(),
        || TomlConfig::load_or_default(MODULE_NAME),
    );

    // RUST_LOG wins over the config file
    let (filter, rejected_level) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, None),
        Err(_) => match EnvFilter::try_new(config.logging.filter_directives()) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new(DEFAULT_LOG_FILTER), Some(&config.logging.level)),
        },
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(level) = rejected_level {
        warn!("Unknown [logging] level '{}', using info", level);
    }

    info!(
        "Starting QMS server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder).with_backup_dir(config.backup_dir.clone());
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    let pool = qms_common::db::init_database(&initializer.database_path())
        .await
        .context("Failed to initialize database")?;

    if let Some(token) = db::users::ensure_bootstrap_admin(&pool)
        .await
        .context("Failed to create bootstrap user")?
    {
        warn!("Bootstrap user 'admin' created. API token (shown once): {}", token);
    }

    let backup_dir = initializer.backup_dir();
    info!("Backup directory: {}", backup_dir.display());
    let app = build_router(AppState::new(pool, backup_dir));

    let host = args
        .host
        .or(config.server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(config.server.port).unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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

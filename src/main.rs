use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use visitlog::config::{Config, DatabaseBackend};
use visitlog::storage::{PostgresStorage, SqliteStorage, Storage};
use visitlog::visits;

#[derive(Parser)]
#[command(name = "visitlog")]
#[command(about = "Records privacy-masked visits and shows the most recent ones", long_about = None)]
struct Cli {
    /// Path to the INI configuration file
    #[arg(short, long, env = "VISITLOG_CONFIG", default_value = Config::DEFAULT_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visitlog=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).with_context(|| {
        format!("failed to load configuration from {}", cli.config.display())
    })?;
    info!(path = %cli.config.display(), backend = ?config.database.backend, "Loaded configuration");

    // Initialize storage
    let settings = config.database.pool_settings();
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.sqlite_url);
            let storage = SqliteStorage::connect(&config.database.sqlite_url, &settings)
                .await
                .context("failed to open SQLite database")?;
            Arc::new(storage)
        }
        DatabaseBackend::Postgres => {
            let pg = config.postgres()?;
            info!(
                host = %pg.host,
                port = pg.port,
                database = %pg.database,
                max_connections = settings.max_connections,
                "Using PostgreSQL storage"
            );
            let storage = PostgresStorage::connect(pg.connect_options(), &settings)
                .await
                .context("failed to connect to PostgreSQL")?;
            Arc::new(storage)
        }
    };

    info!("Initializing database...");
    storage
        .ensure_schema()
        .await
        .context("failed to create visits table")?;
    info!("Database initialized successfully");

    let app = visits::create_visit_router(storage);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 Visit log listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

//! sensorlog server binary.
//!
//! Wires the event store, the broker receive loop, the ingestor and the HTTP
//! API together, with structured logging and graceful shutdown on
//! SIGTERM/SIGINT.

use sensorlog_events::{EventStore, QueryService, SqliteEventStore, StoreError};
use sensorlog_mqtt::{parse_topic_filters, Ingestor, SubscriptionManager, TopicFilterError};
use sensorlog_server::config::{self, Config};
use sensorlog_server::{app, AppState};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// Reasons the server cannot start or keep serving.
#[derive(Debug, Error)]
enum StartupError {
    #[error("failed to create database pool: {0}")]
    Pool(#[from] sensorlog_db::PoolError),

    #[error("failed to initialise event store: {0}")]
    Store(#[from] StoreError),

    #[error("invalid mqtt.topics: {0}")]
    Topics(#[from] TopicFilterError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("http server error: {0}")]
    Serve(std::io::Error),
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("SENSORLOG_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match config::load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    match run(config).await {
        Ok(()) => {
            tracing::info!("sensorlog server shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "sensorlog server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let pool = sensorlog_db::create_pool(
        &config.database.path,
        config.database.runtime_settings(),
    )?;
    let sqlite = SqliteEventStore::initialize(pool, config.database.table.clone())?;
    tracing::info!(
        path = %config.database.path,
        table = sqlite.table(),
        "event store ready"
    );
    let store: Arc<dyn EventStore> = Arc::new(sqlite);

    let filters = parse_topic_filters(&config.mqtt.topics)?;
    let broker = config.mqtt.broker_settings();

    let (message_tx, message_rx) = mpsc::channel(broker.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingestor = Ingestor::new(Arc::clone(&store), config.ingest.settings());
    let ingest_task = tokio::spawn(ingestor.run(message_rx));
    let (receive_task, broker_status) =
        SubscriptionManager::start(broker, filters, message_tx, shutdown_rx)?;

    let query = QueryService::new(store, config.query.limits());
    let limits = query.limits();
    tracing::info!(
        default_limit = limits.default_limit,
        max_limit = limits.max_limit,
        "query limits resolved"
    );
    let state = AppState {
        query,
        broker_status,
    };

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    tracing::info!(%addr, "starting sensorlog server");

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve);

    // Stop the receive loop; it drops the channel sender, which lets the
    // ingestor drain what is queued and exit.
    let _ = shutdown_tx.send(true);
    match receive_task.await {
        Ok(reason) => tracing::info!(reason = ?reason, "broker receive loop finished"),
        Err(e) => tracing::error!(error = %e, "broker receive loop panicked"),
    }
    match ingest_task.await {
        Ok(stats) => tracing::info!(
            received = stats.received,
            stored = stats.stored,
            dropped = stats.dropped,
            "ingestor finished"
        ),
        Err(e) => tracing::error!(error = %e, "ingestor panicked"),
    }

    served
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}

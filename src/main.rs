//! Multi-tenant analytics ingestion service.
//!
//! - Authenticated event ingestion with rate limiting and sampling
//! - Redis stream transport drained by consumer-group workers into Postgres
//! - Daily, hourly and five-minute aggregation plus daily summaries
//! - Raw event retention

mod commands;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ingest_core::Granularity;
use tokio::signal;
use tracing::{error, info, warn};

use api::{router, AppState};
use commands::Command;
use config::{load_config, Config, Mode};
use postgres_client::{init_schema, PostgresClient};
use redis_client::{RedisClient, StreamConsumer, StreamProducer};
use telemetry::init_tracing_from_env;
use worker::{AggregationTarget, WorkerScheduler};

#[derive(Debug, Parser)]
#[command(name = "analytics-ingest", version, about)]
struct Cli {
    /// Defaults to the configured mode
    #[command(subcommand)]
    command: Option<Command>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ requires explicit crypto provider selection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing_from_env();

    let cli = Cli::parse();
    let config = load_config()?;

    let store = PostgresClient::connect(&config.postgres)
        .await
        .context("Failed to connect to Postgres")?;
    init_schema(&store).await.context("Failed to initialise schema")?;

    let redis = RedisClient::connect(config.redis.clone())
        .await
        .context("Failed to connect to Redis")?;

    let command = cli.command.unwrap_or(match config.mode {
        Mode::All => Command::All,
        Mode::Serve => Command::Serve,
        Mode::Worker => Command::Worker,
    });

    match command {
        Command::Serve => run_service(&config, Mode::Serve, store, redis).await,
        Command::Worker => run_service(&config, Mode::Worker, store, redis).await,
        Command::All => run_service(&config, Mode::All, store, redis).await,
        Command::Process(args) => {
            let consumer = StreamConsumer::new(redis);
            commands::process(consumer, store, config.worker.materializer(), args).await
        }
        Command::AggregateDaily { date } => {
            commands::aggregate(store, Granularity::Daily, date.map(AggregationTarget::Daily)).await
        }
        Command::AggregateHourly { at } => {
            commands::aggregate(store, Granularity::Hourly, at.map(AggregationTarget::Hourly)).await
        }
        Command::AggregateFiveMinute { at } => {
            commands::aggregate(store, Granularity::FiveMinute, at.map(AggregationTarget::FiveMinute)).await
        }
        Command::Cleanup { dry_run } => commands::cleanup(store, dry_run).await,
        Command::Status => commands::status(redis, store).await,
    }
}

/// Run the HTTP server and/or background workers until shutdown.
async fn run_service(config: &Config, mode: Mode, store: PostgresClient, redis: RedisClient) -> Result<()> {
    info!(
        mode = ?mode,
        stream = %config.redis.stream_key,
        group = %config.redis.consumer_group,
        "Starting analytics ingestion service"
    );

    check_health(&store, &redis).await;

    let mut worker_handles = Vec::new();
    if mode.runs_workers() {
        let consumer = StreamConsumer::new(redis.clone());
        consumer
            .ensure_group()
            .await
            .context("Failed to create consumer group")?;
        info!(consumer = consumer.consumer_name(), "Joined consumer group");

        let scheduler = Arc::new(WorkerScheduler::with_consumer(
            config.worker.clone(),
            store.clone(),
            consumer,
        ));
        worker_handles = scheduler.start();
    }

    if mode.runs_server() {
        let state = AppState::with_rate_limit(
            Arc::new(StreamProducer::new(redis.clone())),
            store.clone(),
            Arc::new(redis.clone()),
            config.rate_limit.clone(),
        );
        let _rate_limiter_cleanup = state.start_rate_limiter_cleanup();

        let app = router(state);

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .context("Invalid server address")?;

        info!("Listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;
    } else {
        shutdown_signal().await;
    }

    info!("Shutting down...");
    for handle in worker_handles {
        handle.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

/// Check component health on startup.
async fn check_health(store: &PostgresClient, redis: &RedisClient) {
    if redis_client::health::check_connection(redis).await {
        info!("Redis connection: healthy");
    } else {
        error!("Redis connection: unhealthy");
    }

    if postgres_client::health::check_connection(store).await {
        info!("Postgres connection: healthy");
    } else {
        error!("Postgres connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}

//! Mycelio Server
//!
//! Runs the marketplace: REST API, escrow engine, and the timeout sweeps.
//!
//! # Features
//!
//! - Tiered API key authentication (admin / worker)
//! - Per-tier rate limiting by client address
//! - In-process reclaim and auto-settle sweeps, plus scheduler trigger endpoints
//! - PostgreSQL or in-memory storage
//! - Prometheus metrics export
//! - Graceful shutdown
//!
//! # Usage
//!
//! ```bash
//! # Development: in-memory store, pretty logs
//! mycelio-server
//!
//! # PostgreSQL with a config file
//! mycelio-server --config /etc/mycelio/config.toml --database-url postgres://...
//!
//! # Environment overrides
//! MYCELIO__ENGINE__CLAIM_WINDOW=10m MYCELIO__AUTH__CRON__SECRET=... mycelio-server
//! ```

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mycelio_api::{create_router, AppState};
use mycelio_auth::{CredentialService, RateLimiter};
use mycelio_core::{EscrowEngine, SweepScheduler, SystemClock};
use mycelio_db::{MemoryStore, PgStore, Store};

use crate::config::{LoggingConfig, MetricsConfig, ServerConfig, StorageBackend};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Mycelio Server - agent work marketplace with escrowed bounties
#[derive(Parser, Debug)]
#[command(name = "mycelio-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "MYCELIO_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "MYCELIO_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MYCELIO_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MYCELIO_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "MYCELIO_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL; selects the PostgreSQL store
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Shared secret for the scheduler trigger endpoints
    #[arg(long, env = "CRON_SECRET", hide_env_values = true)]
    cron_secret: Option<String>,

    /// Enforce production rules
    #[arg(long, env = "MYCELIO_PRODUCTION")]
    production: bool,
}

impl Args {
    /// CLI flags take precedence over every configuration layer
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(url) = self.database_url {
            config.database.postgres_url = url;
            config.storage.backend = StorageBackend::Postgres;
        }
        if let Some(secret) = self.cron_secret {
            config.auth.cron.secret = Some(secret);
        }
        if self.production {
            config.server.production = true;
        }
        config.apply_production();
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        production = server_config.server.production,
        "Starting Mycelio Server"
    );

    if let Err(errors) = server_config.validate() {
        for error in &errors {
            tracing::error!(error = %error, "Invalid configuration");
        }
        anyhow::bail!("Configuration has {} error(s)", errors.len());
    }
    if server_config.auth.cron.secret.is_none() {
        tracing::warn!("Cron secret not configured; scheduler trigger endpoints are disabled");
    }

    let store = init_store(&server_config).await?;

    let credentials = CredentialService::new(server_config.auth.hashing.clone())?;
    let engine = Arc::new(EscrowEngine::new(
        store,
        credentials.clone(),
        Arc::new(SystemClock),
        server_config.engine.clone(),
    ));

    let state = AppState::new(engine.clone(), credentials, server_config.auth.clone())?;
    spawn_rate_limit_cleanup(state.rate_limiter.clone());

    if server_config.metrics.enabled {
        start_metrics_server(&server_config.metrics)?;
    }

    let sweeps = if server_config.engine.sweep.enabled {
        let scheduler = SweepScheduler::new(engine.clone());
        Some(scheduler.start())
    } else {
        tracing::info!("In-process sweeps disabled; relying on scheduler triggers");
        None
    };

    let app = create_router(Arc::new(state), server_config.api.clone());

    let addr = server_config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        host = %server_config.server.host,
        port = server_config.server.port,
        "Server listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(sweeps) = sweeps {
        let timeout = server_config.server.shutdown_timeout;
        if tokio::time::timeout(timeout, sweeps.shutdown()).await.is_err() {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Sweeps did not stop within the shutdown timeout"
            );
        }
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()?,
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .try_init()?,
    }

    Ok(())
}

/// Connect the configured store
async fn init_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let store = PgStore::connect(&config.database).await?;
            if !store.health_check().await? {
                anyhow::bail!("Database health check failed");
            }
            tracing::info!("Database health check passed");
            Ok(Arc::new(store))
        }
    }
}

/// Drop idle rate-limit buckets periodically
fn spawn_rate_limit_cleanup(limiter: RateLimiter) {
    let period = limiter.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });
}

/// Start the Prometheus exporter on its own port
fn start_metrics_server(config: &MetricsConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    tracing::info!(port = config.port, "Metrics server started");
    Ok(())
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Portfolio Market Data Binary
//!
//! Runs the market data core and the paper portfolio on top of it.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin portfolio-market-data
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `FINNHUB_API_KEY`: Provider credential (default: the persisted one)
//! - `FINNHUB_API_URL`: REST base URL (default: <https://finnhub.io/api/v1>)
//! - `FINNHUB_STREAM_URL`: Streaming URL (default: <wss://ws.finnhub.io>)
//! - `MARKET_DATA_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `MARKET_DATA_STATE_PATH`: State file (default: portfolio-state.json)
//! - `PORTFOLIO_STARTING_BALANCE`: Cash of a fresh portfolio (default: 5000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)
//!
//! Rate budget and reconnect tuning variables are listed on
//! [`MarketDataConfig`].

use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use portfolio_market_data::application::ports::{KeyValueStore, PriceFeed, SystemClock};
use portfolio_market_data::infrastructure::health::{HealthServer, HealthServerState};
use portfolio_market_data::infrastructure::telemetry;
use portfolio_market_data::{
    Credential, HttpGateway, JsonFileStore, MarketDataConfig, MarketDataService, PortfolioLedger,
    RateLimiter, TungsteniteConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting portfolio market data");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = MarketDataConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(&config.portfolio.state_path).with_context(|| {
            format!(
                "failed to open state file {}",
                config.portfolio.state_path.display()
            )
        })?,
    );
    let clock = Arc::new(SystemClock);

    let limiter = RateLimiter::new(config.rate_budget.clone());
    let gateway = HttpGateway::new(
        &config.provider,
        Arc::new(RwLock::new(Credential::default())),
        limiter.clone(),
    )
    .context("failed to build HTTP gateway")?;
    let connector = Arc::new(TungsteniteConnector::new(
        config.provider.stream_url.clone(),
        config.stream.clone(),
    ));

    let service = Arc::new(MarketDataService::new(
        gateway,
        connector,
        Arc::clone(&store),
        clock.clone(),
    ));

    // Spawn the price stream event pump before anything can open the channel
    let pump_service = Arc::clone(&service);
    let pump_shutdown = shutdown_token.clone();
    let pump = tokio::spawn(async move { pump_service.run(pump_shutdown).await });

    let validity = service.start(config.provider.api_key.clone()).await;
    tracing::info!(state = validity.as_str(), "Initial credential checked");

    let feed: Arc<dyn PriceFeed> = Arc::<MarketDataService>::clone(&service);
    let ledger = PortfolioLedger::new(
        feed,
        Arc::clone(&store),
        clock,
        config.portfolio.starting_balance,
    );
    match ledger.restore().await {
        Ok(true) => tracing::info!(balance = %ledger.balance(), "Portfolio restored"),
        Ok(false) => tracing::info!(balance = %ledger.balance(), "Starting fresh portfolio"),
        Err(e) => tracing::warn!(error = %e, "Saved portfolio ignored"),
    }

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Portfolio market data ready");

    await_shutdown(shutdown_token).await;

    ledger.shutdown().await;
    if let Err(e) = ledger.persist() {
        tracing::error!(error = %e, "Failed to save portfolio");
    }
    service.shutdown();
    if let Err(e) = pump.await {
        tracing::warn!(error = %e, "Event pump ended abnormally");
    }

    tracing::info!("Portfolio market data stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &MarketDataConfig) {
    tracing::info!(
        api_url = %config.provider.api_url,
        stream_url = %config.provider.stream_url,
        credential_override = config.provider.api_key.is_some(),
        health_port = config.server.health_port,
        state_path = %config.portfolio.state_path.display(),
        "Configuration loaded"
    );
    tracing::debug!(
        min_interval = ?config.rate_budget.min_interval,
        max_concurrent = config.rate_budget.max_concurrent,
        reservoir = config.rate_budget.reservoir_capacity,
        refill_interval = ?config.rate_budget.refill_interval,
        high_water = config.rate_budget.high_water,
        "Rate budget"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}

use std::sync::Arc;

use aladdin::api::{self, ApiState};
use aladdin::application::engine::{EngineError, TradingEngine};
use aladdin::application::scheduler::{RunOutcome, TickScheduler};
use aladdin::config::{ApiConfig, TradingConfig};
use aladdin::infrastructure::binance_client::{BinanceConfig, BinanceFuturesClient};
use aladdin::persistence::{init_database, DatabaseConfig, SqliteStore};
use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aladdin=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TradingConfig::from_env();
    let api_config = ApiConfig::from_env();
    info!(
        "Aladdin starting: {} on {}, max {} open position(s)",
        config.instruments.join(", "),
        config.resolution,
        config.max_open_positions
    );

    let pool = init_database(&DatabaseConfig::from_env()).await.map_err(|e| {
        error!("Database initialization failed: {}", e);
        e
    })?;
    let store = Arc::new(SqliteStore::new(pool));

    let mut binance = BinanceConfig::default();
    if let Ok(base) = std::env::var("BINANCE_API_BASE") {
        binance.api_base = base;
    }
    let client = Arc::new(BinanceFuturesClient::new(binance)?);
    client.load_markets(&config.instruments).await.map_err(|e| {
        error!("Failed to load markets: {}", e);
        e
    })?;

    let pipeline = TradingEngine::standard_pipeline(&config);
    let scheduler = TickScheduler::new(config.tick_interval_secs);
    let mut engine =
        match TradingEngine::restore(config, client, store.clone(), pipeline, Utc::now()).await {
            Ok(engine) => engine,
            Err(EngineError::ShutdownLatched(days)) => {
                error!(
                    "Loss limit was hit {} days in a row. Refusing to start until loss_limit_days_in_a_row is reset",
                    days
                );
                return Ok(());
            }
            Err(e) => {
                error!("Failed to restore engine state: {}", e);
                return Err(e.into());
            }
        };

    let api_state = ApiState {
        store,
        snapshot: engine.subscribe(),
        stale_after: chrono::Duration::minutes(api_config.stale_after_minutes),
    };
    let listener = tokio::net::TcpListener::bind(&api_config.bind_addr).await?;
    info!("Operator API listening on {}", api_config.bind_addr);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api::router(api_state)).await {
            error!("Operator API stopped: {}", e);
        }
    });

    let outcome = scheduler.run(&mut engine, shutdown_signal()).await;
    server.abort();

    match outcome {
        RunOutcome::Stopped => info!("Shutdown complete"),
        RunOutcome::Shutdown => {
            error!("Governance shutdown. Reset loss_limit_days_in_a_row before restarting")
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

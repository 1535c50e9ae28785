//! Persistence Layer
//!
//! SQLite storage for the trading engine via sqlx, plus an in-memory store
//! with the same contract for tests and dry runs.
//!
//! # Database Schema
//!
//! ## trades
//! - id: INTEGER, assigned by the engine
//! - timestamp: entry time
//! - pair: instrument (e.g., "SOL/USDT")
//! - direction: "long" or "short"
//! - entry_price, quantity, leverage, stop_loss, take_profit: REAL
//! - status: "open", "win" or "loss"
//! - pnl: REAL, NULL while open
//!
//! ## bot_logs
//! - id: autoincrement
//! - timestamp, log_level ("INFO", "WARNING", "ERROR", "CRITICAL"), message
//!
//! ## bot_status
//! - key: primary key ("heartbeat", "loss_limit_days_in_a_row", "loss_limit_day")
//! - value: TEXT
//! - last_updated: timestamp

pub mod memory;
pub mod models;
pub mod repository;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::domain::errors::StoreError;

pub use memory::MemoryStore;
pub use repository::SqliteStore;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// Open the pool described by `config` and run migrations.
///
/// In-memory URLs get a single long-lived connection, since every SQLite
/// connection to `:memory:` is a separate database.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    if !config.log_queries {
        options = options.disable_statement_logging();
    }

    let in_memory = config.url.contains(":memory:");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };
    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY,
            timestamp DATETIME NOT NULL,
            pair TEXT NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('long', 'short')),
            entry_price REAL NOT NULL,
            quantity REAL NOT NULL,
            leverage REAL NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('open', 'win', 'loss')),
            stop_loss REAL NOT NULL,
            take_profit REAL NOT NULL,
            pnl REAL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            log_level TEXT NOT NULL,
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_logs table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_status (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            last_updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_status table: {}", e))
    })?;

    sqlx::query(
        "INSERT OR IGNORE INTO bot_status (key, value, last_updated) VALUES ('loss_limit_days_in_a_row', '0', ?1)",
    )
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to seed bot_status: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bot_logs_level ON bot_logs(log_level)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/aladdin.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/aladdin.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }
}

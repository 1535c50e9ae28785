//! Database Models
//!
//! Row shapes for the trades, bot_logs and bot_status tables, and their
//! conversion into domain types.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::domain::entities::trade::Trade;
use crate::domain::errors::StoreError;
use crate::domain::repositories::trading_store::{LogEntry, LogLevel, StatusEntry};

/// Trade record in database
#[derive(Debug, Clone, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub pair: String,
    pub direction: String, // "long" or "short"
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub status: String, // "open", "win" or "loss"
    pub stop_loss: f64,
    pub take_profit: f64,
    pub pnl: Option<f64>,
}

impl TryFrom<TradeRecord> for Trade {
    type Error = StoreError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        let id = record.id;
        let corrupt = |e: String| StoreError::Corrupt(format!("trade {}: {}", id, e));
        Ok(Trade {
            id: record.id,
            opened_at: record.timestamp,
            direction: record.direction.parse().map_err(corrupt)?,
            status: record.status.parse().map_err(corrupt)?,
            instrument: record.pair,
            entry_price: record.entry_price,
            quantity: record.quantity,
            leverage: record.leverage,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            realized_pnl: record.pnl,
        })
    }
}

/// Log record in database
#[derive(Debug, Clone, FromRow)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub log_level: String,
    pub message: String,
}

impl TryFrom<LogRecord> for LogEntry {
    type Error = StoreError;

    fn try_from(record: LogRecord) -> Result<Self, Self::Error> {
        let level = LogLevel::parse(&record.log_level).ok_or_else(|| {
            StoreError::Corrupt(format!("log {}: level '{}'", record.id, record.log_level))
        })?;
        Ok(LogEntry {
            id: record.id,
            timestamp: record.timestamp,
            level,
            message: record.message,
        })
    }
}

/// Status record in database
#[derive(Debug, Clone, FromRow)]
pub struct StatusRecord {
    pub key: String,
    pub value: String,
    pub last_updated: DateTime<Utc>,
}

impl From<StatusRecord> for StatusEntry {
    fn from(record: StatusRecord) -> Self {
        StatusEntry {
            key: record.key,
            value: record.value,
            last_updated: record.last_updated,
        }
    }
}

//! Trading Store Trait
//!
//! Persistence boundary for trades, the engine log and key/value status rows.
//! Every method is atomic so an interrupted tick never leaves a trade or the
//! loss-limit bookkeeping half-updated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::errors::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Status key holding the last engine heartbeat (RFC 3339)
pub const HEARTBEAT_KEY: &str = "heartbeat";
/// Status key holding the multi-day loss-limit counter
pub const LOSS_LIMIT_DAYS_KEY: &str = "loss_limit_days_in_a_row";
/// Status key holding the UTC date (`YYYY-MM-DD`) the loss limit last tripped
pub const LOSS_LIMIT_DAY_KEY: &str = "loss_limit_day";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(LogLevel::Info),
            "WARNING" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub key: String,
    pub value: String,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait TradingStore: Send + Sync {
    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()>;

    /// Closes an open trade. Returns false if no open trade has this id.
    async fn close_trade(&self, id: i64, status: TradeStatus, pnl: f64) -> StoreResult<bool>;

    async fn open_trades(&self) -> StoreResult<Vec<Trade>>;

    /// Most recent first
    async fn recent_trades(&self, limit: usize) -> StoreResult<Vec<Trade>>;

    async fn max_trade_id(&self) -> StoreResult<Option<i64>>;

    /// Deletes closed trades beyond the `keep` most recent. Open trades are never pruned.
    async fn prune_trades(&self, keep: usize) -> StoreResult<u64>;

    async fn set_status(&self, key: &str, value: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Writes several status rows in one transaction.
    async fn set_statuses(&self, entries: &[(&str, &str)], at: DateTime<Utc>) -> StoreResult<()>;

    async fn get_status(&self, key: &str) -> StoreResult<Option<StatusEntry>>;

    async fn append_log(&self, level: LogLevel, message: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Deletes error-level entries beyond the `keep` most recent.
    async fn prune_error_logs(&self, keep: usize) -> StoreResult<u64>;

    /// Most recent error-level entries first
    async fn recent_error_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_strings() {
        assert_eq!(LogLevel::parse("CRITICAL"), Some(LogLevel::Critical));
        assert_eq!(LogLevel::parse("debug"), None);
        assert!(LogLevel::Error.is_error());
        assert!(!LogLevel::Warning.is_error());
    }
}

//! Database Repository
//!
//! SQLite implementation of [`TradingStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use super::models::{LogRecord, StatusRecord, TradeRecord};
use super::DbPool;
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::errors::StoreError;
use crate::domain::repositories::trading_store::{
    LogEntry, LogLevel, StatusEntry, StoreResult, TradingStore,
};

fn query_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("{}: {}", context, e);
    StoreError::Query(format!("{}: {}", context, e))
}

fn as_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradingStore for SqliteStore {
    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, timestamp, pair, direction, entry_price, quantity,
                leverage, status, stop_loss, take_profit, pnl
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(trade.id)
        .bind(trade.opened_at)
        .bind(&trade.instrument)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price)
        .bind(trade.quantity)
        .bind(trade.leverage)
        .bind(trade.status.as_str())
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.realized_pnl)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert trade", e))?;

        debug!("Inserted trade {} for {}", trade.id, trade.instrument);
        Ok(())
    }

    async fn close_trade(&self, id: i64, status: TradeStatus, pnl: f64) -> StoreResult<bool> {
        let rows_affected = sqlx::query(
            "UPDATE trades SET status = ?1, pnl = ?2 WHERE id = ?3 AND status = 'open'",
        )
        .bind(status.as_str())
        .bind(pnl)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to close trade", e))?
        .rows_affected();

        debug!("Closed trade {} as {} ({} rows)", id, status, rows_affected);
        Ok(rows_affected > 0)
    }

    async fn open_trades(&self) -> StoreResult<Vec<Trade>> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE status = 'open' ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to load open trades", e))?;

        records.into_iter().map(Trade::try_from).collect()
    }

    async fn recent_trades(&self, limit: usize) -> StoreResult<Vec<Trade>> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades ORDER BY id DESC LIMIT ?1",
        )
        .bind(as_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to load recent trades", e))?;

        records.into_iter().map(Trade::try_from).collect()
    }

    async fn max_trade_id(&self) -> StoreResult<Option<i64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM trades")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_error("Failed to read max trade id", e))?;
        Ok(row.0)
    }

    async fn prune_trades(&self, keep: usize) -> StoreResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM trades
            WHERE status != 'open'
              AND id NOT IN (SELECT id FROM trades ORDER BY id DESC LIMIT ?1)
            "#,
        )
        .bind(as_limit(keep))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to prune trades", e))?
        .rows_affected();

        if deleted > 0 {
            debug!("Pruned {} old trades", deleted);
        }
        Ok(deleted)
    }

    async fn set_status(&self, key: &str, value: &str, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_status (key, value, last_updated) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, last_updated = excluded.last_updated
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to write status", e))?;
        Ok(())
    }

    async fn set_statuses(&self, entries: &[(&str, &str)], at: DateTime<Utc>) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin status write", e))?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO bot_status (key, value, last_updated) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, last_updated = excluded.last_updated
                "#,
            )
            .bind(*key)
            .bind(*value)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to write status", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit status write", e))?;
        Ok(())
    }

    async fn get_status(&self, key: &str) -> StoreResult<Option<StatusEntry>> {
        let record = sqlx::query_as::<_, StatusRecord>(
            "SELECT key, value, last_updated FROM bot_status WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to read status", e))?;

        Ok(record.map(StatusEntry::from))
    }

    async fn append_log(&self, level: LogLevel, message: &str, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("INSERT INTO bot_logs (timestamp, log_level, message) VALUES (?1, ?2, ?3)")
            .bind(at)
            .bind(level.as_str())
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to append log", e))?;
        Ok(())
    }

    async fn prune_error_logs(&self, keep: usize) -> StoreResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM bot_logs
            WHERE log_level IN ('ERROR', 'CRITICAL')
              AND id NOT IN (
                SELECT id FROM bot_logs
                WHERE log_level IN ('ERROR', 'CRITICAL')
                ORDER BY id DESC LIMIT ?1
              )
            "#,
        )
        .bind(as_limit(keep))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to prune error logs", e))?
        .rows_affected();
        Ok(deleted)
    }

    async fn recent_error_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let records = sqlx::query_as::<_, LogRecord>(
            r#"
            SELECT id, timestamp, log_level, message FROM bot_logs
            WHERE log_level IN ('ERROR', 'CRITICAL')
            ORDER BY id DESC LIMIT ?1
            "#,
        )
        .bind(as_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to load error logs", e))?;

        records.into_iter().map(LogEntry::try_from).collect()
    }
}

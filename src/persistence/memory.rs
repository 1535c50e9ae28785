//! In-memory [`TradingStore`] with the same semantics as the SQLite store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::errors::StoreError;
use crate::domain::repositories::trading_store::{
    LogEntry, LogLevel, StatusEntry, StoreResult, TradingStore, LOSS_LIMIT_DAYS_KEY,
};

#[derive(Default)]
struct Tables {
    trades: BTreeMap<i64, Trade>,
    logs: Vec<LogEntry>,
    next_log_id: i64,
    status: HashMap<String, StatusEntry>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Empty store seeded like a fresh database.
    pub fn new() -> Self {
        let mut tables = Tables {
            next_log_id: 1,
            ..Tables::default()
        };
        tables.status.insert(
            LOSS_LIMIT_DAYS_KEY.to_string(),
            StatusEntry {
                key: LOSS_LIMIT_DAYS_KEY.to_string(),
                value: "0".to_string(),
                last_updated: Utc::now(),
            },
        );
        MemoryStore {
            tables: RwLock::new(tables),
        }
    }

    /// All log entries, oldest first.
    pub async fn logs(&self) -> Vec<LogEntry> {
        self.tables.read().await.logs.clone()
    }

    pub async fn trade_count(&self) -> usize {
        self.tables.read().await.trades.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradingStore for MemoryStore {
    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.trades.contains_key(&trade.id) {
            return Err(StoreError::Query(format!("duplicate trade id {}", trade.id)));
        }
        tables.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn close_trade(&self, id: i64, status: TradeStatus, pnl: f64) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .trades
            .get_mut(&id)
            .map(|trade| trade.close(status, pnl))
            .unwrap_or(false))
    }

    async fn open_trades(&self) -> StoreResult<Vec<Trade>> {
        let tables = self.tables.read().await;
        Ok(tables.trades.values().filter(|t| t.is_open()).cloned().collect())
    }

    async fn recent_trades(&self, limit: usize) -> StoreResult<Vec<Trade>> {
        let tables = self.tables.read().await;
        Ok(tables.trades.values().rev().take(limit).cloned().collect())
    }

    async fn max_trade_id(&self) -> StoreResult<Option<i64>> {
        Ok(self.tables.read().await.trades.keys().next_back().copied())
    }

    async fn prune_trades(&self, keep: usize) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let stale: Vec<i64> = tables
            .trades
            .values()
            .rev()
            .skip(keep)
            .filter(|t| !t.is_open())
            .map(|t| t.id)
            .collect();
        for id in &stale {
            tables.trades.remove(id);
        }
        Ok(stale.len() as u64)
    }

    async fn set_status(&self, key: &str, value: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.set_statuses(&[(key, value)], at).await
    }

    async fn set_statuses(&self, entries: &[(&str, &str)], at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        for (key, value) in entries {
            tables.status.insert(
                key.to_string(),
                StatusEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                    last_updated: at,
                },
            );
        }
        Ok(())
    }

    async fn get_status(&self, key: &str) -> StoreResult<Option<StatusEntry>> {
        Ok(self.tables.read().await.status.get(key).cloned())
    }

    async fn append_log(&self, level: LogLevel, message: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let id = tables.next_log_id;
        tables.next_log_id += 1;
        tables.logs.push(LogEntry {
            id,
            timestamp: at,
            level,
            message: message.to_string(),
        });
        Ok(())
    }

    async fn prune_error_logs(&self, keep: usize) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let errors = tables.logs.iter().filter(|l| l.level.is_error()).count();
        let mut excess = errors.saturating_sub(keep);
        let removed = excess as u64;
        tables.logs.retain(|l| {
            if excess > 0 && l.level.is_error() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn recent_error_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .iter()
            .rev()
            .filter(|l| l.level.is_error())
            .take(limit)
            .cloned()
            .collect())
    }
}

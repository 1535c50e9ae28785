//! The control loop.
//!
//! One `tick` runs rollover, heartbeat, settlement of open trades, the session
//! governor and, when trading is allowed, entry evaluation for each instrument.
//! The engine owns all mutable state; ticks never overlap.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::TradingConfig;
use crate::domain::entities::account::{AccountSnapshot, AccountState};
use crate::domain::entities::trade::{Direction, Trade};
use crate::domain::errors::StoreError;
use crate::domain::repositories::candle_source::{fetch_with_retry, CandleSource, RetryPolicy};
use crate::domain::repositories::trading_store::{
    LogLevel, TradingStore, HEARTBEAT_KEY, LOSS_LIMIT_DAYS_KEY, LOSS_LIMIT_DAY_KEY,
};
use crate::domain::services::position_ledger::PositionLedger;
use crate::domain::services::position_sizer::RiskSizer;
use crate::domain::services::session_governor::{SessionGovernor, SessionState};
use crate::domain::services::signal_pipeline::SignalPipeline;
use crate::domain::services::strategies::StrategySet;
use crate::domain::services::trend_filters::TrendFilters;

/// Bars fetched when checking open trades; the last one is evaluated.
const MONITOR_WINDOW: usize = 2;
/// Format of the persisted loss-limit trip date
const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("loss limit was hit {0} days in a row; reset loss_limit_days_in_a_row to resume")]
    ShutdownLatched(u32),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// State published to the operator API after every tick
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub account: AccountSnapshot,
    pub session: SessionState,
    pub open_trades: Vec<Trade>,
    pub last_tick: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub closed: Vec<Trade>,
    pub opened: Vec<Trade>,
    pub session: SessionState,
}

pub struct TradingEngine {
    config: TradingConfig,
    source: Arc<dyn CandleSource>,
    store: Arc<dyn TradingStore>,
    pipeline: SignalPipeline,
    ledger: PositionLedger,
    governor: SessionGovernor,
    account: AccountState,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl TradingEngine {
    /// Builds the engine from persisted state: open trades, the next trade id and
    /// the loss-limit-days counter. Refuses to start if that counter already
    /// requires shutdown.
    pub async fn restore(
        config: TradingConfig,
        source: Arc<dyn CandleSource>,
        store: Arc<dyn TradingStore>,
        pipeline: SignalPipeline,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let governor = SessionGovernor::new(config.governor);

        let loss_limit_days = match store.get_status(LOSS_LIMIT_DAYS_KEY).await? {
            Some(entry) => entry.value.trim().parse::<u32>().map_err(|_| {
                StoreError::Corrupt(format!("{} = '{}'", LOSS_LIMIT_DAYS_KEY, entry.value))
            })?,
            None => 0,
        };
        if governor.must_refuse_start(loss_limit_days) {
            return Err(EngineError::ShutdownLatched(loss_limit_days));
        }

        let last_trip = match store.get_status(LOSS_LIMIT_DAY_KEY).await? {
            Some(entry) => Some(
                NaiveDate::parse_from_str(entry.value.trim(), DAY_FORMAT).map_err(|_| {
                    StoreError::Corrupt(format!("{} = '{}'", LOSS_LIMIT_DAY_KEY, entry.value))
                })?,
            ),
            None => None,
        };
        let restored = governor.restore_limit(loss_limit_days, last_trip, now);
        if restored.counter_reset {
            store.set_status(LOSS_LIMIT_DAYS_KEY, "0", now).await?;
        }
        if restored.reached_today {
            warn!("Loss limit already reached today. Entries stay halted until rollover");
        }

        let open_trades = store.open_trades().await?;
        let max_id = store.max_trade_id().await?;
        let ledger = PositionLedger::restore(RiskSizer::new(config.risk), open_trades, max_id);
        if ledger.open_count() > 0 {
            info!("Restored {} open trade(s)", ledger.open_count());
        }

        let account = AccountState::new(config.initial_balance, now)
            .with_loss_limit(restored.loss_limit_days, restored.reached_today);

        let initial = EngineSnapshot {
            account: account.snapshot(),
            session: governor.state(&account),
            open_trades: ledger.open_trades().cloned().collect(),
            last_tick: None,
        };
        let (snapshot_tx, _) = watch::channel(initial);

        Ok(TradingEngine {
            config,
            source,
            store,
            pipeline,
            ledger,
            governor,
            account,
            snapshot_tx,
        })
    }

    /// Production strategy set and filters from `config`.
    pub fn standard_pipeline(config: &TradingConfig) -> SignalPipeline {
        SignalPipeline::new(
            StrategySet::standard(),
            TrendFilters::new(config.filters.clone()),
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn session(&self) -> SessionState {
        self.governor.state(&self.account)
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if let Some(rollover) = self.governor.roll_over(&mut self.account, now) {
            if rollover.counter_reset {
                self.persist_loss_limit(now, false).await;
            }
        }

        if let Err(e) = self
            .store
            .set_status(HEARTBEAT_KEY, &now.to_rfc3339(), now)
            .await
        {
            self.log_event(LogLevel::Error, &format!("Heartbeat write failed: {}", e), now)
                .await;
        }

        let closed = self.settle_open_trades(now).await;

        let decision = self.governor.evaluate(&mut self.account, &closed);
        if decision.loss_limit_tripped {
            self.log_event(
                LogLevel::Warning,
                &format!(
                    "Consecutive loss limit reached. Loss-limit days in a row: {}",
                    self.account.loss_limit_days_in_a_row()
                ),
                now,
            )
            .await;
            self.persist_loss_limit(now, true).await;
        }
        if decision.state == SessionState::Shutdown && decision.loss_limit_tripped {
            self.log_event(
                LogLevel::Critical,
                &format!(
                    "Loss limit hit {} days in a row. Shutting down",
                    self.account.loss_limit_days_in_a_row()
                ),
                now,
            )
            .await;
        }

        let opened = if decision.state.entries_allowed() {
            self.evaluate_entries(now).await
        } else {
            debug!("Entries halted: {:?}", decision.state);
            Vec::new()
        };

        let session = self.session();
        self.publish(now);
        TickOutcome {
            closed,
            opened,
            session,
        }
    }

    async fn settle_open_trades(&mut self, now: DateTime<Utc>) -> Vec<Trade> {
        let instruments: Vec<String> = self
            .ledger
            .open_trades()
            .map(|t| t.instrument.clone())
            .collect();

        let mut closed = Vec::new();
        for instrument in instruments {
            let candles = match fetch_with_retry(
                self.source.as_ref(),
                &instrument,
                &self.config.resolution,
                MONITOR_WINDOW,
                RetryPolicy::once(),
            )
            .await
            {
                Ok(candles) if candles.len() >= MONITOR_WINDOW => candles,
                Ok(candles) => {
                    warn!(
                        "{}: {} bar(s) returned, need {} to monitor",
                        instrument,
                        candles.len(),
                        MONITOR_WINDOW
                    );
                    continue;
                }
                Err(e) => {
                    warn!("{}: monitoring fetch failed: {}", instrument, e);
                    continue;
                }
            };
            let Some(bar) = candles.last() else {
                continue;
            };

            if let Some(trade) = self.ledger.settle(&mut self.account, &instrument, bar, now) {
                let pnl = trade.realized_pnl.unwrap_or_default();
                match self.store.close_trade(trade.id, trade.status, pnl).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Trade {} was not open in the store", trade.id),
                    Err(e) => {
                        self.log_event(
                            LogLevel::Error,
                            &format!("Failed to persist closure of trade {}: {}", trade.id, e),
                            now,
                        )
                        .await;
                    }
                }
                self.log_event(
                    LogLevel::Info,
                    &format!(
                        "TRADE CLOSED ({}): {}. PnL: {:+.2}. Consecutive losses: {}",
                        trade.status,
                        instrument,
                        pnl,
                        self.account.consecutive_losses()
                    ),
                    now,
                )
                .await;
                closed.push(trade);
            }
        }
        closed
    }

    async fn evaluate_entries(&mut self, now: DateTime<Utc>) -> Vec<Trade> {
        let mut opened = Vec::new();
        let instruments = self.config.instruments.clone();

        for instrument in &instruments {
            if self.ledger.open_count() >= self.config.max_open_positions {
                debug!("Max open positions reached");
                break;
            }
            if self.ledger.has_open(instrument) {
                continue;
            }
            if self
                .account
                .in_cooldown(instrument, now, self.config.cooldown())
            {
                debug!("{}: in cooldown", instrument);
                continue;
            }

            let candles = match fetch_with_retry(
                self.source.as_ref(),
                instrument,
                &self.config.resolution,
                self.config.candle_window,
                self.config.fetch_retry,
            )
            .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("{}: skipped this tick, fetch failed: {}", instrument, e);
                    continue;
                }
            };

            let signal = self.pipeline.evaluate(instrument, &candles);
            let (Some(direction), Some(last)) = (Direction::from_signal(signal), candles.last())
            else {
                continue;
            };
            let entry_price = last.close.value();
            let leverage = self.config.leverage_for(instrument);

            match self
                .ledger
                .open(&self.account, instrument, direction, entry_price, leverage, now)
            {
                Ok(trade) => {
                    if let Err(e) = self.store.insert_trade(&trade).await {
                        self.log_event(
                            LogLevel::Error,
                            &format!("Failed to persist trade {}: {}", trade.id, e),
                            now,
                        )
                        .await;
                    }
                    self.log_event(
                        LogLevel::Info,
                        &format!(
                            "NEW TRADE: {} {} at {:.4}. SL: {:.4}, TP: {:.4}",
                            direction, instrument, entry_price, trade.stop_loss, trade.take_profit
                        ),
                        now,
                    )
                    .await;
                    if let Err(e) = self.store.prune_trades(self.config.trade_retention).await {
                        warn!("Trade pruning failed: {}", e);
                    }
                    opened.push(trade);
                }
                Err(rejection) => warn!("{}: entry rejected: {}", instrument, rejection),
            }
        }
        opened
    }

    /// Writes the loss-limit-days counter, together with today's date when the
    /// limit has just tripped.
    async fn persist_loss_limit(&self, now: DateTime<Utc>, tripped: bool) {
        let days = self.account.loss_limit_days_in_a_row().to_string();
        let day = self.account.trading_day().format(DAY_FORMAT).to_string();
        let result = if tripped {
            self.store
                .set_statuses(
                    &[(LOSS_LIMIT_DAYS_KEY, days.as_str()), (LOSS_LIMIT_DAY_KEY, day.as_str())],
                    now,
                )
                .await
        } else {
            self.store.set_status(LOSS_LIMIT_DAYS_KEY, &days, now).await
        };

        if let Err(e) = result {
            self.log_event(
                LogLevel::Error,
                &format!("Failed to persist {}: {}", LOSS_LIMIT_DAYS_KEY, e),
                now,
            )
            .await;
        }
    }

    /// Traces the event. Error-level events are also appended to the store's
    /// log table, which keeps only the most recent ones.
    async fn log_event(&self, level: LogLevel, message: &str, now: DateTime<Utc>) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error | LogLevel::Critical => error!("{}", message),
        }
        if !level.is_error() {
            return;
        }

        if let Err(e) = self.store.append_log(level, message, now).await {
            error!("Failed to write log entry: {}", e);
            return;
        }
        if let Err(e) = self
            .store
            .prune_error_logs(self.config.error_log_retention)
            .await
        {
            warn!("Error log pruning failed: {}", e);
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        let snapshot = EngineSnapshot {
            account: self.account.snapshot(),
            session: self.session(),
            open_trades: self.ledger.open_trades().cloned().collect(),
            last_tick: Some(now),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

//! Engine End-to-End Tests
//!
//! Drives `TradingEngine::tick` against a scripted candle source and the
//! in-memory store. Strategy votes are stubbed so every scenario controls
//! exactly when entries fire; the trend filters run for real on a steady
//! uptrend.
//!
//! Test Categories:
//! 1. Entry gating - position cap, cooldown
//! 2. Session governance - consecutive losses, rollover, shutdown
//! 3. Restart - recovery of open trades, refusal to start, same-day limits
//! 4. Degraded collaborators - failing fetches, failing store writes

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use aladdin::application::engine::{EngineError, TradingEngine};
use aladdin::application::scheduler::{RunOutcome, TickScheduler};
use aladdin::config::TradingConfig;
use aladdin::domain::entities::trade::{Direction, Trade, TradeStatus};
use aladdin::domain::errors::{MarketDataError, StoreError};
use aladdin::domain::repositories::candle_source::{CandleSource, RetryPolicy};
use aladdin::domain::repositories::trading_store::{
    LogEntry, LogLevel, StatusEntry, StoreResult, TradingStore, HEARTBEAT_KEY,
    LOSS_LIMIT_DAYS_KEY, LOSS_LIMIT_DAY_KEY,
};
use aladdin::domain::services::indicators::Candle;
use aladdin::domain::services::session_governor::SessionState;
use aladdin::domain::services::signal_pipeline::SignalPipeline;
use aladdin::domain::services::strategies::{Signal, Strategy, StrategyRole, StrategySet};
use aladdin::domain::services::trend_filters::TrendFilters;
use aladdin::persistence::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

const SOL: &str = "SOL/USDT";
const LTC: &str = "LTC/USDT";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Steady uptrend: +0.3 per bar, bars 0.4 wide. Strong ADX, close above EMA.
fn uptrend(bars: usize) -> Vec<Candle> {
    let start = t0() - Duration::minutes(5 * bars as i64);
    (0..bars)
        .map(|i| {
            let close = 100.0 + 0.3 * i as f64;
            Candle::new(
                start + Duration::minutes(5 * i as i64),
                close,
                close + 0.2,
                close - 0.2,
                close,
                1_000.0,
            )
            .unwrap()
        })
        .collect()
}

fn last_close() -> f64 {
    uptrend(100).last().unwrap().close.value()
}

/// Bar that hits a long's stop (entry at `last_close`, leverage 100).
fn stop_bar() -> Candle {
    let c = last_close();
    Candle::new(t0(), c, c, c - 3.0, c - 2.5, 1_000.0).unwrap()
}

/// Bar that hits a long's target.
fn target_bar() -> Candle {
    let c = last_close();
    Candle::new(t0(), c, c + 3.0, c - 0.1, c + 2.5, 1_000.0).unwrap()
}

/// Serves the uptrend for every instrument. A two-bar (monitoring) request
/// ends with the instrument's scripted exit bar when one is set. Instruments
/// marked failing always return a permanent error.
#[derive(Default)]
struct ScriptedSource {
    exit_bars: Mutex<HashMap<String, Candle>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedSource {
    fn set_exit(&self, instrument: &str, bar: Candle) {
        self.exit_bars
            .lock()
            .unwrap()
            .insert(instrument.to_string(), bar);
    }

    fn clear_exit(&self, instrument: &str) {
        self.exit_bars.lock().unwrap().remove(instrument);
    }

    fn fail(&self, instrument: &str) {
        self.failing.lock().unwrap().insert(instrument.to_string());
    }
}

#[async_trait]
impl CandleSource for ScriptedSource {
    async fn fetch(
        &self,
        instrument: &str,
        _resolution: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        if self.failing.lock().unwrap().contains(instrument) {
            return Err(MarketDataError::Permanent(format!("{} delisted", instrument)));
        }
        let mut candles = uptrend(100);
        if count == 2 {
            if let Some(bar) = self.exit_bars.lock().unwrap().get(instrument) {
                candles.push(bar.clone());
            }
        }
        let skip = candles.len().saturating_sub(count);
        Ok(candles.split_off(skip))
    }
}

struct Vote(StrategyRole, Signal);

impl Strategy for Vote {
    fn name(&self) -> &'static str {
        "vote"
    }
    fn role(&self) -> StrategyRole {
        self.0
    }
    fn generate_signal(&self, _candles: &[Candle]) -> Signal {
        self.1
    }
}

fn always_long() -> SignalPipeline {
    let set = StrategySet::new(vec![
        Box::new(Vote(StrategyRole::Trend, Signal::Long)),
        Box::new(Vote(StrategyRole::Momentum, Signal::Long)),
    ])
    .unwrap();
    SignalPipeline::new(set, TrendFilters::default())
}

fn config(instruments: &[&str], cooldown_minutes: i64) -> TradingConfig {
    TradingConfig {
        instruments: instruments.iter().map(|s| s.to_string()).collect(),
        cooldown_minutes,
        fetch_retry: RetryPolicy::once(),
        ..TradingConfig::default()
    }
}

async fn engine(
    config: TradingConfig,
    source: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
    now: DateTime<Utc>,
) -> TradingEngine {
    TradingEngine::restore(config, source, store, always_long(), now)
        .await
        .unwrap()
}

// ============================================================================
// CATEGORY 1: Entry gating
// ============================================================================

#[tokio::test]
async fn test_position_cap_takes_first_instrument_only() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL, LTC], 30), source, store.clone(), t0()).await;

    let outcome = engine.tick(t0()).await;
    assert_eq!(outcome.opened.len(), 1);
    assert_eq!(outcome.opened[0].instrument, SOL);
    assert_eq!(outcome.opened[0].direction, Direction::Long);
    assert_eq!(outcome.opened[0].entry_price, last_close());
    assert_eq!(outcome.opened[0].leverage, 100.0);
    assert_eq!(outcome.session, SessionState::Trading);

    // No exit bar: the trade stays open and the cap still holds
    let outcome = engine.tick(t0() + Duration::minutes(5)).await;
    assert!(outcome.closed.is_empty());
    assert!(outcome.opened.is_empty());
    assert_eq!(engine.ledger().open_count(), 1);
    assert_eq!(store.open_trades().await.unwrap().len(), 1);
    assert!(store.get_status(HEARTBEAT_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_stop_hit_starts_cooldown() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL], 30), source.clone(), store.clone(), t0()).await;

    engine.tick(t0()).await;
    source.set_exit(SOL, stop_bar());

    let closed_at = t0() + Duration::minutes(5);
    let outcome = engine.tick(closed_at).await;
    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].status, TradeStatus::Loss);
    assert!(outcome.opened.is_empty(), "re-entry inside cooldown");
    assert!((engine.account().balance() - 99.0).abs() < 1e-9);

    source.clear_exit(SOL);
    let outcome = engine.tick(closed_at + Duration::minutes(20)).await;
    assert!(outcome.opened.is_empty());

    let outcome = engine.tick(closed_at + Duration::minutes(35)).await;
    assert_eq!(outcome.opened.len(), 1);
    assert_eq!(outcome.opened[0].id, 2);

    let stored = store.recent_trades(10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].status, TradeStatus::Loss);
    let pnl = stored[1].realized_pnl.unwrap();
    assert!((pnl + 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_take_profit_credits_reward() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL], 30), source.clone(), store, t0()).await;

    engine.tick(t0()).await;
    source.set_exit(SOL, target_bar());
    let outcome = engine.tick(t0() + Duration::minutes(5)).await;

    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].status, TradeStatus::Win);
    assert!((engine.account().balance() - 102.0).abs() < 1e-9);
    assert_eq!(engine.account().consecutive_losses(), 0);
}

// ============================================================================
// CATEGORY 2: Session governance
// ============================================================================

/// Opens and stops out `losses` trades in a row on SOL with no cooldown.
async fn lose_in_a_row(
    engine: &mut TradingEngine,
    source: &ScriptedSource,
    losses: usize,
    start: DateTime<Utc>,
) -> SessionState {
    source.clear_exit(SOL);
    let mut now = start;
    engine.tick(now).await;
    source.set_exit(SOL, stop_bar());

    let mut session = engine.session();
    for _ in 0..losses {
        now += Duration::minutes(5);
        let outcome = engine.tick(now).await;
        assert_eq!(outcome.closed.len(), 1);
        session = outcome.session;
    }
    session
}

#[tokio::test]
async fn test_three_losses_halt_entries_for_the_day() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL], 0), source.clone(), store.clone(), t0()).await;

    let session = lose_in_a_row(&mut engine, &source, 3, t0()).await;
    assert_eq!(session, SessionState::LossLimitReached);
    assert_eq!(engine.ledger().open_count(), 0);
    assert_eq!(engine.account().consecutive_losses(), 3);
    assert_eq!(engine.account().loss_limit_days_in_a_row(), 1);

    let outcome = engine.tick(t0() + Duration::hours(2)).await;
    assert!(outcome.opened.is_empty());

    let days = store.get_status(LOSS_LIMIT_DAYS_KEY).await.unwrap().unwrap();
    assert_eq!(days.value, "1");
    let day = store.get_status(LOSS_LIMIT_DAY_KEY).await.unwrap().unwrap();
    assert_eq!(day.value, "2024-03-01");

    // Trade events are traced only; the log table holds error-level rows
    assert!(store.logs().await.iter().all(|entry| entry.level.is_error()));
}

#[tokio::test]
async fn test_rollover_resumes_trading_and_keeps_counter() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL], 0), source.clone(), store.clone(), t0()).await;

    lose_in_a_row(&mut engine, &source, 3, t0()).await;
    source.clear_exit(SOL);

    let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 0, 5, 0).unwrap();
    let outcome = engine.tick(next_day).await;
    assert_eq!(outcome.session, SessionState::Trading);
    assert_eq!(outcome.opened.len(), 1);
    assert_eq!(engine.account().loss_limit_days_in_a_row(), 1);
    assert!((engine.account().daily_starting_balance() - engine.account().balance()).abs() < 1e-9);

    // A clean day clears the counter at the following rollover
    let day_after = Utc.with_ymd_and_hms(2024, 3, 3, 0, 5, 0).unwrap();
    engine.tick(day_after).await;
    assert_eq!(engine.account().loss_limit_days_in_a_row(), 0);
    let days = store.get_status(LOSS_LIMIT_DAYS_KEY).await.unwrap().unwrap();
    assert_eq!(days.value, "0");
}

#[tokio::test]
async fn test_third_limit_day_shuts_down() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    store.set_status(LOSS_LIMIT_DAYS_KEY, "2", t0()).await.unwrap();
    let mut engine = engine(config(&[SOL], 0), source.clone(), store.clone(), t0()).await;

    let session = lose_in_a_row(&mut engine, &source, 3, t0()).await;
    assert_eq!(session, SessionState::Shutdown);
    assert!(store
        .logs()
        .await
        .iter()
        .any(|entry| entry.level == LogLevel::Critical));

    let scheduler = TickScheduler::new(300);
    let outcome = scheduler
        .run(&mut engine, std::future::pending::<()>())
        .await;
    assert_eq!(outcome, RunOutcome::Shutdown);
}

#[tokio::test]
async fn test_scheduler_stops_on_signal() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL], 30), source, store.clone(), Utc::now()).await;

    let outcome = TickScheduler::new(300)
        .run(&mut engine, std::future::ready(()))
        .await;
    assert_eq!(outcome, RunOutcome::Stopped);
    assert!(store.get_status(HEARTBEAT_KEY).await.unwrap().is_some());
}

// ============================================================================
// CATEGORY 3: Restart
// ============================================================================

#[tokio::test]
async fn test_restart_restores_open_trade_and_ids() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    {
        let mut first = engine(config(&[SOL, LTC], 0), source.clone(), store.clone(), t0()).await;
        first.tick(t0()).await;
    }

    let later = t0() + Duration::minutes(10);
    let mut second = engine(config(&[SOL, LTC], 0), source.clone(), store.clone(), later).await;
    assert_eq!(second.ledger().open_count(), 1);
    assert!(second.ledger().has_open(SOL));

    let outcome = second.tick(later).await;
    assert!(outcome.opened.is_empty());

    source.set_exit(SOL, target_bar());
    let outcome = second.tick(later + Duration::minutes(5)).await;
    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].id, 1);
    assert_eq!(outcome.opened.len(), 1);
    assert_eq!(outcome.opened[0].id, 2);
    assert_eq!(store.trade_count().await, 2);
}

#[tokio::test]
async fn test_refuses_start_after_three_limit_days() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    store.set_status(LOSS_LIMIT_DAYS_KEY, "3", t0()).await.unwrap();

    let result =
        TradingEngine::restore(config(&[SOL], 30), source, store, always_long(), t0()).await;
    assert!(matches!(result, Err(EngineError::ShutdownLatched(3))));
}

#[tokio::test]
async fn test_corrupt_counter_is_a_store_error() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    store
        .set_status(LOSS_LIMIT_DAYS_KEY, "many", t0())
        .await
        .unwrap();

    let result =
        TradingEngine::restore(config(&[SOL], 30), source, store, always_long(), t0()).await;
    assert!(matches!(result, Err(EngineError::Store(_))));
}

#[tokio::test]
async fn test_restart_on_limit_day_stays_halted() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    {
        let mut first = engine(config(&[SOL], 0), source.clone(), store.clone(), t0()).await;
        lose_in_a_row(&mut first, &source, 3, t0()).await;
    }

    let later = t0() + Duration::hours(1);
    let mut second = engine(config(&[SOL], 0), source.clone(), store.clone(), later).await;
    assert_eq!(second.session(), SessionState::LossLimitReached);
    assert_eq!(second.account().loss_limit_days_in_a_row(), 1);

    source.clear_exit(SOL);
    let outcome = second.tick(later).await;
    assert!(outcome.opened.is_empty());
    assert_eq!(outcome.session, SessionState::LossLimitReached);

    let days = store.get_status(LOSS_LIMIT_DAYS_KEY).await.unwrap().unwrap();
    assert_eq!(days.value, "1");
}

#[tokio::test]
async fn test_restart_after_clean_day_resets_counter() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    {
        let mut first = engine(config(&[SOL], 0), source.clone(), store.clone(), t0()).await;
        lose_in_a_row(&mut first, &source, 3, t0()).await;
    }
    source.clear_exit(SOL);

    // Next day: the limit day just ended, the counter carries over
    let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
    let resumed = engine(config(&[SOL], 0), source.clone(), store.clone(), next_day).await;
    assert_eq!(resumed.session(), SessionState::Trading);
    assert_eq!(resumed.account().loss_limit_days_in_a_row(), 1);
    drop(resumed);

    // Two days later: 2024-03-02 was clean while the process was down
    let two_days_later = Utc.with_ymd_and_hms(2024, 3, 3, 9, 0, 0).unwrap();
    let engine = engine(config(&[SOL], 0), source, store.clone(), two_days_later).await;
    assert_eq!(engine.account().loss_limit_days_in_a_row(), 0);
    let days = store.get_status(LOSS_LIMIT_DAYS_KEY).await.unwrap().unwrap();
    assert_eq!(days.value, "0");
}

#[tokio::test]
async fn test_corrupt_trip_date_is_a_store_error() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(MemoryStore::new());
    store
        .set_status(LOSS_LIMIT_DAY_KEY, "yesterday", t0())
        .await
        .unwrap();

    let result =
        TradingEngine::restore(config(&[SOL], 30), source, store, always_long(), t0()).await;
    assert!(matches!(result, Err(EngineError::Store(_))));
}

// ============================================================================
// CATEGORY 4: Degraded collaborators
// ============================================================================

#[tokio::test]
async fn test_failing_fetch_skips_only_that_instrument() {
    let source = Arc::new(ScriptedSource::default());
    source.fail(SOL);
    let store = Arc::new(MemoryStore::new());
    let mut engine = engine(config(&[SOL, LTC], 30), source, store.clone(), t0()).await;

    let outcome = engine.tick(t0()).await;
    assert_eq!(outcome.opened.len(), 1);
    assert_eq!(outcome.opened[0].instrument, LTC);
    assert!(!engine.ledger().has_open(SOL));
    assert_eq!(store.trade_count().await, 1);
}

/// Delegates to a `MemoryStore` but rejects every trade write.
struct TradeWritesFail {
    inner: Arc<MemoryStore>,
}

fn disk_full() -> StoreError {
    StoreError::Query("disk I/O error".to_string())
}

#[async_trait]
impl TradingStore for TradeWritesFail {
    async fn insert_trade(&self, _trade: &Trade) -> StoreResult<()> {
        Err(disk_full())
    }

    async fn close_trade(&self, _id: i64, _status: TradeStatus, _pnl: f64) -> StoreResult<bool> {
        Err(disk_full())
    }

    async fn open_trades(&self) -> StoreResult<Vec<Trade>> {
        self.inner.open_trades().await
    }

    async fn recent_trades(&self, limit: usize) -> StoreResult<Vec<Trade>> {
        self.inner.recent_trades(limit).await
    }

    async fn max_trade_id(&self) -> StoreResult<Option<i64>> {
        self.inner.max_trade_id().await
    }

    async fn prune_trades(&self, keep: usize) -> StoreResult<u64> {
        self.inner.prune_trades(keep).await
    }

    async fn set_status(&self, key: &str, value: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.set_status(key, value, at).await
    }

    async fn set_statuses(&self, entries: &[(&str, &str)], at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.set_statuses(entries, at).await
    }

    async fn get_status(&self, key: &str) -> StoreResult<Option<StatusEntry>> {
        self.inner.get_status(key).await
    }

    async fn append_log(&self, level: LogLevel, message: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.append_log(level, message, at).await
    }

    async fn prune_error_logs(&self, keep: usize) -> StoreResult<u64> {
        self.inner.prune_error_logs(keep).await
    }

    async fn recent_error_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>> {
        self.inner.recent_error_logs(limit).await
    }
}

#[tokio::test]
async fn test_store_write_failures_leave_memory_authoritative() {
    let source = Arc::new(ScriptedSource::default());
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(TradeWritesFail {
        inner: inner.clone(),
    });
    let mut engine =
        TradingEngine::restore(config(&[SOL], 30), source.clone(), store, always_long(), t0())
            .await
            .unwrap();

    let outcome = engine.tick(t0()).await;
    assert_eq!(outcome.opened.len(), 1);
    assert!(engine.ledger().has_open(SOL));
    assert_eq!(inner.trade_count().await, 0);

    source.set_exit(SOL, stop_bar());
    let outcome = engine.tick(t0() + Duration::minutes(5)).await;
    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(engine.ledger().open_count(), 0);
    assert!((engine.account().balance() - 99.0).abs() < 1e-9);
    assert_eq!(engine.account().consecutive_losses(), 1);

    let errors = inner.recent_error_logs(10).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|entry| entry.level == LogLevel::Error));
    assert!(errors[0].message.contains("closure of trade 1"));
    assert!(errors[1].message.contains("persist trade 1"));
}

//! Historical replay through the live signal pipeline and sizer.
//!
//! One position at a time. Each bar first settles the open trade (stop
//! first), then, if flat, evaluates the trailing window ending at that bar and
//! enters at the next bar's open.

use std::io::Read;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::entities::account::AccountState;
use crate::domain::entities::trade::{Direction, Trade, TradeStatus};
use crate::domain::services::indicators::Candle;
use crate::domain::services::position_ledger::PositionLedger;
use crate::domain::services::position_sizer::RiskSizer;
use crate::domain::services::signal_pipeline::SignalPipeline;
use crate::domain::value_objects::position_sizing::RiskPolicy;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("no candles in input")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub instrument: String,
    pub initial_balance: f64,
    pub leverage: f64,
    pub risk: RiskPolicy,
    /// Bars skipped before the first evaluation
    pub warmup: usize,
    /// Trailing bars handed to the pipeline, matching the live fetch window
    pub window: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            instrument: "SOL/USDT".to_string(),
            initial_balance: 100.0,
            leverage: 100.0,
            risk: RiskPolicy::default(),
            warmup: 50,
            window: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub instrument: String,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub starting_balance: f64,
    pub final_balance: f64,
    #[serde(skip)]
    pub closed: Vec<Trade>,
}

impl BacktestReport {
    fn from_closed(config: &BacktestConfig, closed: Vec<Trade>, final_balance: f64) -> Self {
        let wins = closed.iter().filter(|t| t.status == TradeStatus::Win).count();
        let losses = closed.iter().filter(|t| t.status == TradeStatus::Loss).count();
        let trades = closed.len();
        let win_rate = if trades > 0 {
            wins as f64 / trades as f64 * 100.0
        } else {
            0.0
        };
        BacktestReport {
            instrument: config.instrument.clone(),
            trades,
            wins,
            losses,
            win_rate,
            starting_balance: config.initial_balance,
            final_balance,
            closed,
        }
    }
}

pub struct Backtester {
    config: BacktestConfig,
    pipeline: SignalPipeline,
}

impl Backtester {
    pub fn new(config: BacktestConfig, pipeline: SignalPipeline) -> Self {
        Backtester { config, pipeline }
    }

    pub fn run(&self, candles: &[Candle]) -> BacktestReport {
        let instrument = self.config.instrument.as_str();
        let Some(first) = candles.first() else {
            return BacktestReport::from_closed(&self.config, Vec::new(), self.config.initial_balance);
        };

        let mut account = AccountState::new(self.config.initial_balance, first.timestamp);
        let mut ledger = PositionLedger::new(RiskSizer::new(self.config.risk));
        let mut closed = Vec::new();
        let window = self.config.window.max(1);

        // The last bar has no next open to enter at
        for i in self.config.warmup..candles.len().saturating_sub(1) {
            let current = &candles[i];
            if let Some(trade) = ledger.settle(&mut account, instrument, current, current.timestamp) {
                closed.push(trade);
            }
            if ledger.has_open(instrument) {
                continue;
            }

            let start = (i + 1).saturating_sub(window);
            let history = &candles[start..=i];
            let Some(direction) = Direction::from_signal(self.pipeline.evaluate(instrument, history))
            else {
                continue;
            };

            let next = &candles[i + 1];
            if let Err(rejection) = ledger.open(
                &account,
                instrument,
                direction,
                next.open.value(),
                self.config.leverage,
                next.timestamp,
            ) {
                debug!("Bar {}: entry rejected: {}", i, rejection);
            }
        }

        let report = BacktestReport::from_closed(&self.config, closed, account.balance());
        info!(
            "Backtest {}: {} trades, {} wins, {} losses, final balance {:.2}",
            report.instrument, report.trades, report.wins, report.losses, report.final_balance
        );
        report
    }
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    #[serde(alias = "timestamp", alias = "time")]
    ts: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(alias = "volume", default)]
    vol: f64,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Reads `ts,open,high,low,close,vol` rows. `ts` may be epoch milliseconds,
/// RFC 3339, or `YYYY-MM-DD HH:MM:SS[+00:00]`.
pub fn load_candles_csv<R: Read>(reader: R) -> Result<Vec<Candle>, BacktestError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut candles: Vec<Candle> = Vec::new();

    for (index, row) in csv_reader.deserialize::<CandleRow>().enumerate() {
        let row = row?;
        let line = index + 2;
        let timestamp = parse_timestamp(&row.ts).ok_or_else(|| BacktestError::InvalidRow {
            row: line,
            message: format!("unparsable timestamp '{}'", row.ts),
        })?;
        let candle = Candle::new(timestamp, row.open, row.high, row.low, row.close, row.vol)
            .map_err(|message| BacktestError::InvalidRow { row: line, message })?;

        if let Some(prev) = candles.last() {
            if candle.timestamp <= prev.timestamp {
                return Err(BacktestError::InvalidRow {
                    row: line,
                    message: "timestamps must be strictly increasing".to_string(),
                });
            }
        }
        candles.push(candle);
    }

    if candles.is_empty() {
        return Err(BacktestError::Empty);
    }
    Ok(candles)
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::services::indicators::Candle;
use crate::domain::services::strategies::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::Long => Some(Direction::Long),
            Signal::Short => Some(Direction::Short),
            Signal::None => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Win,
    Loss,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Win => "win",
            TradeStatus::Loss => "loss",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "win" => Ok(TradeStatus::Win),
            "loss" => Ok(TradeStatus::Loss),
            other => Err(format!("unknown trade status '{}'", other)),
        }
    }
}

/// One simulated position from entry to closure.
///
/// Stop and target are fixed at open. Status and pnl change exactly once,
/// through [`Trade::close`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub opened_at: DateTime<Utc>,
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub status: TradeStatus,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub realized_pnl: Option<f64>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Outcome implied by one bar, or `None` if neither level was touched.
    /// When the bar spans both levels the stop wins.
    pub fn evaluate_exit(&self, bar: &Candle) -> Option<TradeStatus> {
        if !self.is_open() {
            return None;
        }
        let (high, low) = (bar.high.value(), bar.low.value());
        match self.direction {
            Direction::Long if low <= self.stop_loss => Some(TradeStatus::Loss),
            Direction::Long if high >= self.take_profit => Some(TradeStatus::Win),
            Direction::Short if high >= self.stop_loss => Some(TradeStatus::Loss),
            Direction::Short if low <= self.take_profit => Some(TradeStatus::Win),
            _ => None,
        }
    }

    /// Transition Open -> Win | Loss. Returns false if already closed or
    /// `status` is `Open`.
    pub fn close(&mut self, status: TradeStatus, pnl: f64) -> bool {
        if !self.is_open() || !status.is_closed() {
            return false;
        }
        self.status = status;
        self.realized_pnl = Some(pnl);
        true
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

/// Balance and day-scoped risk counters owned by the trading engine.
///
/// Fields are read through getters. Only the position ledger (closures) and
/// the session governor (limits, rollover) mutate them.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    balance: f64,
    daily_starting_balance: f64,
    consecutive_losses: u32,
    profit_target_reached: bool,
    loss_limit_reached: bool,
    loss_limit_days_in_a_row: u32,
    last_trade_close: HashMap<String, DateTime<Utc>>,
    trading_day: NaiveDate,
}

impl AccountState {
    pub fn new(balance: f64, now: DateTime<Utc>) -> Self {
        AccountState {
            balance,
            daily_starting_balance: balance,
            consecutive_losses: 0,
            profit_target_reached: false,
            loss_limit_reached: false,
            loss_limit_days_in_a_row: 0,
            last_trade_close: HashMap::new(),
            trading_day: now.date_naive(),
        }
    }

    /// Restores the persisted multi-day counter after a restart. `reached_today`
    /// re-arms the daily halt when the limit already tripped on this UTC day.
    pub fn with_loss_limit(mut self, days: u32, reached_today: bool) -> Self {
        self.loss_limit_days_in_a_row = days;
        self.loss_limit_reached = reached_today;
        self
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn daily_starting_balance(&self) -> f64 {
        self.daily_starting_balance
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn profit_target_reached(&self) -> bool {
        self.profit_target_reached
    }

    pub fn loss_limit_reached(&self) -> bool {
        self.loss_limit_reached
    }

    pub fn loss_limit_days_in_a_row(&self) -> u32 {
        self.loss_limit_days_in_a_row
    }

    pub fn trading_day(&self) -> NaiveDate {
        self.trading_day
    }

    pub fn last_close(&self, instrument: &str) -> Option<DateTime<Utc>> {
        self.last_trade_close.get(instrument).copied()
    }

    /// True while fewer than `cooldown` has elapsed since the instrument's last closure.
    pub fn in_cooldown(&self, instrument: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_close(instrument)
            .map(|closed| now - closed < cooldown)
            .unwrap_or(false)
    }

    /// Return on the day so far, as a fraction of the starting balance.
    pub fn daily_return(&self) -> Option<f64> {
        if self.daily_starting_balance > 0.0 {
            Some((self.balance - self.daily_starting_balance) / self.daily_starting_balance)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            balance: self.balance,
            daily_starting_balance: self.daily_starting_balance,
            consecutive_losses: self.consecutive_losses,
            profit_target_reached: self.profit_target_reached,
            loss_limit_reached: self.loss_limit_reached,
            loss_limit_days_in_a_row: self.loss_limit_days_in_a_row,
            trading_day: self.trading_day,
        }
    }

    pub(crate) fn apply_closure(&mut self, instrument: &str, pnl: f64, won: bool, at: DateTime<Utc>) {
        self.balance += pnl;
        if won {
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
        }
        self.last_trade_close.insert(instrument.to_string(), at);
    }

    pub(crate) fn mark_profit_target(&mut self) {
        self.profit_target_reached = true;
    }

    /// Sets the daily loss-limit flag. Returns false if it was already set.
    pub(crate) fn mark_loss_limit(&mut self) -> bool {
        if self.loss_limit_reached {
            return false;
        }
        self.loss_limit_reached = true;
        self.loss_limit_days_in_a_row += 1;
        true
    }

    /// Starts a new trading day. Returns the previous day's loss-limit flag.
    pub(crate) fn start_day(&mut self, day: NaiveDate) -> bool {
        let hit_limit = self.loss_limit_reached;
        if !hit_limit {
            self.loss_limit_days_in_a_row = 0;
        }
        self.trading_day = day;
        self.daily_starting_balance = self.balance;
        self.profit_target_reached = false;
        self.loss_limit_reached = false;
        hit_limit
    }
}

/// Read-only view published to the operator API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub daily_starting_balance: f64,
    pub consecutive_losses: u32,
    pub profit_target_reached: bool,
    pub loss_limit_reached: bool,
    pub loss_limit_days_in_a_row: u32,
    pub trading_day: NaiveDate,
}

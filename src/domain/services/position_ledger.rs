//! Open-trade book: entry admission and Open -> Win | Loss settlement.
//!
//! The ledger is pure in-memory state. Persisting its transitions is the
//! caller's job, so the same ledger drives both the live engine and the
//! backtester.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::entities::account::AccountState;
use crate::domain::entities::trade::{Direction, Trade, TradeStatus};
use crate::domain::errors::EntryRejection;
use crate::domain::services::indicators::Candle;
use crate::domain::services::position_sizer::RiskSizer;

#[derive(Debug, Clone)]
pub struct PositionLedger {
    open: BTreeMap<String, Trade>,
    next_id: i64,
    sizer: RiskSizer,
}

impl PositionLedger {
    pub fn new(sizer: RiskSizer) -> Self {
        PositionLedger {
            open: BTreeMap::new(),
            next_id: 1,
            sizer,
        }
    }

    /// Rebuilds the book from persisted open trades. Ids continue after `max_id`.
    pub fn restore(sizer: RiskSizer, open_trades: Vec<Trade>, max_id: Option<i64>) -> Self {
        let mut ledger = Self::new(sizer);
        ledger.next_id = max_id.unwrap_or(0) + 1;
        for trade in open_trades.into_iter().filter(Trade::is_open) {
            if ledger.open.contains_key(&trade.instrument) {
                warn!(
                    "Ignoring duplicate open trade {} for {}",
                    trade.id, trade.instrument
                );
                continue;
            }
            ledger.next_id = ledger.next_id.max(trade.id + 1);
            ledger.open.insert(trade.instrument.clone(), trade);
        }
        ledger
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn has_open(&self, instrument: &str) -> bool {
        self.open.contains_key(instrument)
    }

    pub fn open_trade(&self, instrument: &str) -> Option<&Trade> {
        self.open.get(instrument)
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.open.values()
    }

    /// Sizes and records a new Open trade. Balance and counters are untouched.
    pub fn open(
        &mut self,
        account: &AccountState,
        instrument: &str,
        direction: Direction,
        entry_price: f64,
        leverage: f64,
        now: DateTime<Utc>,
    ) -> Result<Trade, EntryRejection> {
        if self.has_open(instrument) {
            return Err(EntryRejection::AlreadyOpen(instrument.to_string()));
        }

        let plan = self
            .sizer
            .size(account.balance(), leverage, entry_price, direction)?;

        let trade = Trade {
            id: self.next_id,
            opened_at: now,
            instrument: instrument.to_string(),
            direction,
            entry_price,
            quantity: plan.quantity,
            leverage,
            status: TradeStatus::Open,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            realized_pnl: None,
        };
        self.next_id += 1;
        self.open.insert(instrument.to_string(), trade.clone());

        info!(
            "Opened {} {} #{} at {:.4} qty {:.6} SL {:.4} TP {:.4}",
            direction, instrument, trade.id, entry_price, plan.quantity, plan.stop_loss, plan.take_profit
        );
        Ok(trade)
    }

    /// Checks the instrument's open trade against `bar` and closes it if a level
    /// was touched. Returns the closed trade.
    pub fn settle(
        &mut self,
        account: &mut AccountState,
        instrument: &str,
        bar: &Candle,
        now: DateTime<Utc>,
    ) -> Option<Trade> {
        let status = self.open.get(instrument)?.evaluate_exit(bar)?;
        let mut trade = self.open.remove(instrument)?;

        let risk = self
            .sizer
            .risk_for(trade.entry_price, trade.quantity, trade.leverage);
        let won = status == TradeStatus::Win;
        let pnl = self.sizer.payout(risk, won);
        trade.close(status, pnl);
        account.apply_closure(instrument, pnl, won, now);

        info!(
            "Closed {} #{} as {} pnl {:+.4} balance {:.4}",
            instrument,
            trade.id,
            status,
            pnl,
            account.balance()
        );
        Some(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::indicators::test_support::candles_from_hlc;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn bar(high: f64, low: f64) -> Candle {
        candles_from_hlc(&[(high, low, (high + low) / 2.0)]).remove(0)
    }

    #[test]
    fn test_open_assigns_ids_and_sizes() {
        let account = AccountState::new(100.0, t0());
        let mut ledger = PositionLedger::new(RiskSizer::default());
        let trade = ledger
            .open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0())
            .unwrap();
        assert_eq!(trade.id, 1);
        assert!((trade.quantity - 4.0).abs() < 1e-9);
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(account.balance(), 100.0);

        let second = ledger
            .open(&account, "LTC/USDT", Direction::Short, 80.0, 100.0, t0())
            .unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(ledger.open_count(), 2);
    }

    #[test]
    fn test_second_entry_on_same_instrument_rejected() {
        let account = AccountState::new(100.0, t0());
        let mut ledger = PositionLedger::new(RiskSizer::default());
        ledger
            .open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0())
            .unwrap();
        let result = ledger.open(&account, "SOL/USDT", Direction::Short, 50.0, 100.0, t0());
        assert_eq!(result, Err(EntryRejection::AlreadyOpen("SOL/USDT".into())));
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_zero_balance_rejected() {
        let account = AccountState::new(0.0, t0());
        let mut ledger = PositionLedger::new(RiskSizer::default());
        let result = ledger.open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0());
        assert!(matches!(result, Err(EntryRejection::Sizing(_))));
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_settle_win_and_loss() {
        let mut account = AccountState::new(100.0, t0());
        let mut ledger = PositionLedger::new(RiskSizer::default());
        ledger
            .open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0())
            .unwrap();

        assert!(ledger.settle(&mut account, "SOL/USDT", &bar(50.2, 49.9), t0()).is_none());

        let closed = ledger
            .settle(&mut account, "SOL/USDT", &bar(50.6, 49.9), t0())
            .unwrap();
        assert_eq!(closed.status, TradeStatus::Win);
        assert!((closed.realized_pnl.unwrap() - 2.0).abs() < 1e-9);
        assert!((account.balance() - 102.0).abs() < 1e-9);
        assert!(!ledger.has_open("SOL/USDT"));

        ledger
            .open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0())
            .unwrap();
        let closed = ledger
            .settle(&mut account, "SOL/USDT", &bar(51.0, 49.0), t0())
            .unwrap();
        assert_eq!(closed.status, TradeStatus::Loss);
        assert_eq!(account.consecutive_losses(), 1);
    }

    #[test]
    fn test_pnl_uses_entry_time_risk() {
        let mut account = AccountState::new(100.0, t0());
        let mut ledger = PositionLedger::new(RiskSizer::default());
        ledger
            .open(&account, "SOL/USDT", Direction::Short, 50.0, 100.0, t0())
            .unwrap();
        // A win elsewhere grows the balance before closure
        account.apply_closure("LTC/USDT", 50.0, true, t0());

        let closed = ledger
            .settle(&mut account, "SOL/USDT", &bar(50.1, 49.0), t0())
            .unwrap();
        assert!((closed.realized_pnl.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_settle_starts_cooldown() {
        let mut account = AccountState::new(100.0, t0());
        let mut ledger = PositionLedger::new(RiskSizer::default());
        ledger
            .open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0())
            .unwrap();
        let close_at = t0() + Duration::minutes(10);
        ledger.settle(&mut account, "SOL/USDT", &bar(50.0, 49.0), close_at);
        assert_eq!(account.last_close("SOL/USDT"), Some(close_at));
    }

    #[test]
    fn test_restore_continues_ids() {
        let account = AccountState::new(100.0, t0());
        let mut source = PositionLedger::new(RiskSizer::default());
        let open = source
            .open(&account, "SOL/USDT", Direction::Long, 50.0, 100.0, t0())
            .unwrap();
        let duplicate = Trade { id: 3, ..open.clone() };

        let mut restored =
            PositionLedger::restore(RiskSizer::default(), vec![open, duplicate], Some(7));
        assert_eq!(restored.open_count(), 1);
        assert_eq!(restored.open_trade("SOL/USDT").map(|t| t.id), Some(1));
        let next = restored
            .open(&account, "LTC/USDT", Direction::Long, 80.0, 100.0, t0())
            .unwrap();
        assert_eq!(next.id, 8);
    }
}

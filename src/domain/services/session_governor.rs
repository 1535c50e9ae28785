//! Day-scoped risk limits.
//!
//! The governor owns no state of its own: it reads and mutates the
//! [`AccountState`] and reports what changed so the caller can persist it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::entities::account::AccountState;
use crate::domain::entities::trade::{Trade, TradeStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorPolicy {
    /// Daily return that halts new entries (0.06 = 6%)
    pub daily_profit_target: f64,
    pub max_consecutive_losses: u32,
    /// Consecutive loss-limit days that shut the engine down
    pub max_loss_limit_days: u32,
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        GovernorPolicy {
            daily_profit_target: 0.06,
            max_consecutive_losses: 3,
            max_loss_limit_days: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Trading,
    ProfitTargetReached,
    LossLimitReached,
    /// Terminal. The process must stop and stay stopped until an operator
    /// resets the persisted loss-limit-days counter.
    Shutdown,
}

impl SessionState {
    pub fn entries_allowed(&self) -> bool {
        matches!(self, SessionState::Trading)
    }
}

/// Result of a UTC day change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rollover {
    pub previous_day: NaiveDate,
    pub new_day: NaiveDate,
    /// The loss-limit-days counter was reset to zero and must be persisted
    pub counter_reset: bool,
}

/// Persisted loss-limit bookkeeping reconciled against the restart date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoredLimit {
    pub loss_limit_days: u32,
    /// The limit already tripped on the current UTC day
    pub reached_today: bool,
    /// A clean day passed while stopped; the zeroed counter must be persisted
    pub counter_reset: bool,
}

/// What one evaluation changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorDecision {
    pub state: SessionState,
    /// The loss limit was tripped by this evaluation; the counter must be persisted
    pub loss_limit_tripped: bool,
    pub profit_target_tripped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionGovernor {
    policy: GovernorPolicy,
}

impl SessionGovernor {
    pub fn new(policy: GovernorPolicy) -> Self {
        SessionGovernor { policy }
    }

    /// True if the persisted counter already requires shutdown.
    pub fn must_refuse_start(&self, loss_limit_days: u32) -> bool {
        loss_limit_days >= self.policy.max_loss_limit_days
    }

    /// Applies the rollover rules to state persisted before a restart.
    ///
    /// A trip dated today re-arms the daily halt. A trip dated yesterday keeps
    /// the counter. Anything older means at least one clean day went by, so the
    /// counter resets. Without a recorded date the counter is kept as is.
    pub fn restore_limit(
        &self,
        loss_limit_days: u32,
        last_trip: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> RestoredLimit {
        let today = now.date_naive();
        let kept = RestoredLimit {
            loss_limit_days,
            reached_today: false,
            counter_reset: false,
        };
        let Some(day) = last_trip else {
            return kept;
        };

        if day >= today {
            RestoredLimit {
                reached_today: true,
                ..kept
            }
        } else if today.pred_opt() == Some(day) {
            kept
        } else {
            if loss_limit_days > 0 {
                info!(
                    "Loss limit last hit on {}. Resetting loss-limit days from {}",
                    day, loss_limit_days
                );
            }
            RestoredLimit {
                loss_limit_days: 0,
                reached_today: false,
                counter_reset: loss_limit_days > 0,
            }
        }
    }

    /// Starts a new trading day if `now` falls on a later UTC date.
    pub fn roll_over(&self, account: &mut AccountState, now: DateTime<Utc>) -> Option<Rollover> {
        let today = now.date_naive();
        let previous_day = account.trading_day();
        if today <= previous_day {
            return None;
        }

        let hit_limit = account.start_day(today);
        info!(
            "New trading day {}. Daily starting balance {:.4}, loss-limit days {}",
            today,
            account.daily_starting_balance(),
            account.loss_limit_days_in_a_row()
        );
        Some(Rollover {
            previous_day,
            new_day: today,
            counter_reset: !hit_limit,
        })
    }

    /// Applies the limits after this tick's closures. Calling it again with no
    /// new closures changes nothing.
    pub fn evaluate(&self, account: &mut AccountState, closed_this_tick: &[Trade]) -> GovernorDecision {
        let loss_this_tick = closed_this_tick
            .iter()
            .any(|t| t.status == TradeStatus::Loss);

        let mut loss_limit_tripped = false;
        if loss_this_tick
            && account.consecutive_losses() >= self.policy.max_consecutive_losses
            && account.mark_loss_limit()
        {
            loss_limit_tripped = true;
            warn!(
                "Consecutive loss limit reached ({} losses). Entries halted for the day. Loss-limit days: {}",
                account.consecutive_losses(),
                account.loss_limit_days_in_a_row()
            );
        }

        let mut profit_target_tripped = false;
        if !account.profit_target_reached() {
            if let Some(ret) = account.daily_return() {
                if ret >= self.policy.daily_profit_target {
                    account.mark_profit_target();
                    profit_target_tripped = true;
                    info!(
                        "Daily profit target reached ({:.2}%). Entries halted for the day",
                        ret * 100.0
                    );
                }
            }
        }

        let state = self.state(account);
        if state == SessionState::Shutdown && loss_limit_tripped {
            error!(
                "Loss limit hit {} days in a row. Shutting down",
                account.loss_limit_days_in_a_row()
            );
        }

        GovernorDecision {
            state,
            loss_limit_tripped,
            profit_target_tripped,
        }
    }

    pub fn state(&self, account: &AccountState) -> SessionState {
        if account.loss_limit_days_in_a_row() >= self.policy.max_loss_limit_days {
            SessionState::Shutdown
        } else if account.loss_limit_reached() {
            SessionState::LossLimitReached
        } else if account.profit_target_reached() {
            SessionState::ProfitTargetReached
        } else {
            SessionState::Trading
        }
    }
}

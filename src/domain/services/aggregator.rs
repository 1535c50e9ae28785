use tracing::debug;

use crate::domain::services::strategies::{Signal, StrategyRole, StrategyVote};

/// Trend/momentum agreement vote.
///
/// A direction is taken only when at least one trend strategy and at least one
/// momentum strategy agree on it. Long is checked first. Unvoted strategies are
/// logged and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalAggregator;

impl SignalAggregator {
    pub fn new() -> Self {
        SignalAggregator
    }

    pub fn aggregate(&self, votes: &[StrategyVote]) -> Signal {
        let has = |role: StrategyRole, signal: Signal| {
            votes.iter().any(|v| v.role == role && v.signal == signal)
        };

        for vote in votes.iter().filter(|v| v.role == StrategyRole::Unvoted) {
            debug!("{} signal {:?} not voted", vote.name, vote.signal);
        }

        if has(StrategyRole::Trend, Signal::Long) && has(StrategyRole::Momentum, Signal::Long) {
            Signal::Long
        } else if has(StrategyRole::Trend, Signal::Short)
            && has(StrategyRole::Momentum, Signal::Short)
        {
            Signal::Short
        } else {
            Signal::None
        }
    }
}

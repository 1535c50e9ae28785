//! Fixed-risk position sizing
//!
//! margin = balance × margin_pct, notional = margin × leverage, and the stop and
//! target sit at the price distance where the loss equals `risk` and the gain
//! equals `risk × reward_multiplier`.

use crate::domain::entities::trade::Direction;
use crate::domain::errors::SizingError;
use crate::domain::value_objects::position_sizing::{PositionPlan, RiskPolicy};

#[derive(Debug, Clone, Default)]
pub struct RiskSizer {
    policy: RiskPolicy,
}

impl RiskSizer {
    pub fn new(policy: RiskPolicy) -> Self {
        RiskSizer { policy }
    }

    pub fn size(
        &self,
        balance: f64,
        leverage: f64,
        entry: f64,
        direction: Direction,
    ) -> Result<PositionPlan, SizingError> {
        if !entry.is_finite() || entry <= 0.0 {
            return Err(SizingError::InvalidPrice(entry));
        }
        if !leverage.is_finite() || leverage <= 0.0 {
            return Err(SizingError::InvalidLeverage(leverage));
        }

        let margin = balance * self.policy.margin_pct;
        let quantity = margin * leverage / entry;
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(SizingError::InvalidSize(quantity));
        }

        let risk = margin * self.policy.risk_pct;
        let reward = risk * self.policy.reward_multiplier;
        let stop_distance = risk / quantity;
        let target_distance = reward / quantity;

        let (stop_loss, take_profit) = match direction {
            Direction::Long => (entry - stop_distance, entry + target_distance),
            Direction::Short => (entry + stop_distance, entry - target_distance),
        };

        Ok(PositionPlan {
            quantity,
            stop_loss,
            take_profit,
            risk,
            reward,
        })
    }

    /// Risk of an existing position, recomputed from its stored fields.
    /// Equals `PositionPlan::risk` for a position sized by this policy.
    pub fn risk_for(&self, entry: f64, quantity: f64, leverage: f64) -> f64 {
        (entry * quantity / leverage) * self.policy.risk_pct
    }

    /// Signed pnl for a closure: `+risk × reward_multiplier` on a win, `-risk` on a loss.
    pub fn payout(&self, risk: f64, won: bool) -> f64 {
        if won {
            risk * self.policy.reward_multiplier
        } else {
            -risk
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_worked_example_long() {
        let sizer = RiskSizer::default();
        let plan = sizer.size(100.0, 100.0, 50.0, Direction::Long).unwrap();
        assert!(approx(plan.quantity, 4.0));
        assert!(approx(plan.stop_loss, 49.75));
        assert!(approx(plan.take_profit, 50.5));
        assert!(approx(plan.risk, 1.0));
        assert!(approx(plan.reward, 2.0));
    }

    #[test]
    fn test_worked_example_short_is_mirrored() {
        let sizer = RiskSizer::default();
        let plan = sizer.size(100.0, 100.0, 50.0, Direction::Short).unwrap();
        assert!(approx(plan.stop_loss, 50.25));
        assert!(approx(plan.take_profit, 49.5));
    }

    #[test]
    fn test_risk_for_matches_plan() {
        let sizer = RiskSizer::default();
        let plan = sizer.size(250.0, 10.0, 123.4, Direction::Long).unwrap();
        assert!(approx(sizer.risk_for(123.4, plan.quantity, 10.0), plan.risk));
        assert!(approx(sizer.payout(plan.risk, true), plan.reward));
        assert!(approx(sizer.payout(plan.risk, false), -plan.risk));
    }

    #[test]
    fn test_rejects_zero_size() {
        let sizer = RiskSizer::default();
        assert_eq!(
            sizer.size(0.0, 100.0, 50.0, Direction::Long),
            Err(SizingError::InvalidSize(0.0))
        );
        assert!(sizer.size(-10.0, 100.0, 50.0, Direction::Long).is_err());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let sizer = RiskSizer::default();
        assert_eq!(
            sizer.size(100.0, 100.0, 0.0, Direction::Long),
            Err(SizingError::InvalidPrice(0.0))
        );
        assert!(matches!(
            sizer.size(100.0, 0.0, 50.0, Direction::Long),
            Err(SizingError::InvalidLeverage(_))
        ));
    }
}

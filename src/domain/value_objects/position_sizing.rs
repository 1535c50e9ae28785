//! Fixed-risk sizing policy and the resulting position plan

use serde::{Deserialize, Serialize};

/// Fractions applied to the account balance when sizing a new position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Share of balance committed as margin (0.02 = 2%)
    pub margin_pct: f64,
    /// Share of the margin lost when the stop is hit
    pub risk_pct: f64,
    /// Reward as a multiple of risk
    pub reward_multiplier: f64,
}

impl RiskPolicy {
    /// # Returns
    /// Ok(RiskPolicy) if every fraction is positive and finite, Err(String) otherwise
    pub fn new(margin_pct: f64, risk_pct: f64, reward_multiplier: f64) -> Result<Self, String> {
        for (name, value) in [
            ("margin_pct", margin_pct),
            ("risk_pct", risk_pct),
            ("reward_multiplier", reward_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be positive", name));
            }
        }
        if margin_pct > 1.0 {
            return Err("margin_pct must be in range (0, 1]".to_string());
        }
        Ok(RiskPolicy {
            margin_pct,
            risk_pct,
            reward_multiplier,
        })
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        RiskPolicy {
            margin_pct: 0.02,
            risk_pct: 0.5,
            reward_multiplier: 2.0,
        }
    }
}

/// Output of the sizer for one entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionPlan {
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Balance lost if the stop is hit
    pub risk: f64,
    /// Balance gained if the target is hit
    pub reward: f64,
}

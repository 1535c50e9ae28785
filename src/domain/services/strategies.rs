//! The five signal generators.
//!
//! Every strategy is a pure function of a candle window. Indicator failures
//! (short window, zero denominators) fail closed to `Signal::None`.

use serde::Serialize;
use tracing::debug;

use crate::domain::errors::IndicatorError;
use crate::domain::services::indicators::{
    last_two, BollingerBands, Candle, Indicator, MACD, RSI, SMA,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Long,
    Short,
    #[default]
    None,
}

/// How the aggregator treats a strategy's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyRole {
    Trend,
    Momentum,
    /// Computed and logged, never voted
    Unvoted,
}

pub trait Strategy {
    fn name(&self) -> &'static str;
    fn role(&self) -> StrategyRole;
    fn generate_signal(&self, candles: &[Candle]) -> Signal;
}

/// Unwraps an indicator result, logging and returning `Signal::None` on failure.
macro_rules! or_none {
    ($name:expr, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                debug!("{}: {}", $name, e);
                return Signal::None;
            }
        }
    };
}

fn cross(prev_a: f64, prev_b: f64, last_a: f64, last_b: f64) -> Signal {
    if prev_a < prev_b && last_a > last_b {
        Signal::Long
    } else if prev_a > prev_b && last_a < last_b {
        Signal::Short
    } else {
        Signal::None
    }
}

pub struct MaCrossover {
    pub fast: SMA,
    pub slow: SMA,
}

impl MaCrossover {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        MaCrossover {
            fast: SMA::new(fast_period),
            slow: SMA::new(slow_period),
        }
    }
}

impl Default for MaCrossover {
    fn default() -> Self {
        Self::new(13, 48)
    }
}

impl Strategy for MaCrossover {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn role(&self) -> StrategyRole {
        StrategyRole::Trend
    }

    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        let fast = or_none!(self.name(), self.fast.calculate(candles));
        let slow = or_none!(self.name(), self.slow.calculate(candles));
        match (last_two(&fast), last_two(&slow)) {
            (Some((prev_fast, last_fast)), Some((prev_slow, last_slow))) => {
                cross(prev_fast, prev_slow, last_fast, last_slow)
            }
            _ => Signal::None,
        }
    }
}

pub struct RsiExtremes {
    pub rsi: RSI,
    pub oversold: f64,
    pub overbought: f64,
}

impl RsiExtremes {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        RsiExtremes {
            rsi: RSI::new(period),
            oversold,
            overbought,
        }
    }
}

impl Default for RsiExtremes {
    fn default() -> Self {
        Self::new(14, 30.0, 70.0)
    }
}

impl Strategy for RsiExtremes {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn role(&self) -> StrategyRole {
        StrategyRole::Momentum
    }

    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        let values = or_none!(self.name(), self.rsi.calculate(candles));
        match values.last() {
            Some(&rsi) if rsi < self.oversold => Signal::Long,
            Some(&rsi) if rsi > self.overbought => Signal::Short,
            _ => Signal::None,
        }
    }
}

pub struct BollingerBreakout {
    pub bands: BollingerBands,
}

impl BollingerBreakout {
    pub fn new(period: usize, std_dev: f64) -> Self {
        BollingerBreakout {
            bands: BollingerBands::new(period, std_dev),
        }
    }
}

impl Default for BollingerBreakout {
    fn default() -> Self {
        Self::new(20, 2.0)
    }
}

impl Strategy for BollingerBreakout {
    fn name(&self) -> &'static str {
        "bollinger"
    }

    fn role(&self) -> StrategyRole {
        StrategyRole::Momentum
    }

    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        let bands = or_none!(self.name(), self.bands.calculate_detailed(candles));
        let (Some(close), Some(&upper), Some(&lower)) = (
            candles.last().map(|c| c.close.value()),
            bands.upper.last(),
            bands.lower.last(),
        ) else {
            return Signal::None;
        };

        if close > upper {
            Signal::Long
        } else if close < lower {
            Signal::Short
        } else {
            Signal::None
        }
    }
}

pub struct MacdCrossover {
    pub macd: MACD,
}

impl MacdCrossover {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        MacdCrossover {
            macd: MACD::new(fast, slow, signal),
        }
    }
}

impl Default for MacdCrossover {
    fn default() -> Self {
        Self::new(12, 26, 9)
    }
}

impl Strategy for MacdCrossover {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn role(&self) -> StrategyRole {
        StrategyRole::Trend
    }

    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        let values = or_none!(self.name(), self.macd.calculate_detailed(candles));
        match (last_two(&values.macd), last_two(&values.signal)) {
            (Some((prev_macd, last_macd)), Some((prev_signal, last_signal))) => {
                cross(prev_macd, prev_signal, last_macd, last_signal)
            }
            _ => Signal::None,
        }
    }
}

/// Close beyond the range of bars `[-lookback, -skip)`.
pub struct RangeBreakout {
    pub lookback: usize,
    pub skip: usize,
}

impl Default for RangeBreakout {
    fn default() -> Self {
        RangeBreakout {
            lookback: 5,
            skip: 2,
        }
    }
}

impl RangeBreakout {
    fn range(&self, candles: &[Candle]) -> Result<(f64, f64), IndicatorError> {
        if self.skip >= self.lookback {
            return Err(IndicatorError::InvalidPeriod(self.lookback));
        }
        if candles.len() < self.lookback {
            return Err(IndicatorError::InsufficientData {
                required: self.lookback,
                available: candles.len(),
            });
        }
        let n = candles.len();
        let window = &candles[n - self.lookback..n - self.skip];
        let high = window
            .iter()
            .map(|c| c.high.value())
            .fold(f64::NEG_INFINITY, f64::max);
        let low = window
            .iter()
            .map(|c| c.low.value())
            .fold(f64::INFINITY, f64::min);
        Ok((high, low))
    }
}

impl Strategy for RangeBreakout {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn role(&self) -> StrategyRole {
        StrategyRole::Unvoted
    }

    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        let (high, low) = or_none!(self.name(), self.range(candles));
        let Some(close) = candles.last().map(|c| c.close.value()) else {
            return Signal::None;
        };
        if close > high {
            Signal::Long
        } else if close < low {
            Signal::Short
        } else {
            Signal::None
        }
    }
}

/// Output of one strategy for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyVote {
    pub name: &'static str,
    pub role: StrategyRole,
    pub signal: Signal,
}

pub struct StrategySet {
    pub strategies: Vec<Box<dyn Strategy + Send + Sync>>,
}

impl StrategySet {
    pub fn new(strategies: Vec<Box<dyn Strategy + Send + Sync>>) -> Result<Self, String> {
        if strategies.is_empty() {
            return Err("At least one strategy is required".to_string());
        }
        Ok(StrategySet { strategies })
    }

    /// MA crossover, RSI, Bollinger, MACD and range breakout with their
    /// production parameters.
    pub fn standard() -> Self {
        StrategySet {
            strategies: vec![
                Box::new(MaCrossover::default()),
                Box::new(RsiExtremes::default()),
                Box::new(BollingerBreakout::default()),
                Box::new(MacdCrossover::default()),
                Box::new(RangeBreakout::default()),
            ],
        }
    }

    pub fn evaluate(&self, candles: &[Candle]) -> Vec<StrategyVote> {
        self.strategies
            .iter()
            .map(|s| StrategyVote {
                name: s.name(),
                role: s.role(),
                signal: s.generate_signal(candles),
            })
            .collect()
    }
}

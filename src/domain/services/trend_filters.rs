//! Post-aggregation vetoes: trend strength (ADX) and direction (EMA of close).
//!
//! Both fail closed: any indicator error rejects the signal.

use tracing::{debug, warn};

use crate::domain::errors::IndicatorError;
use crate::domain::services::indicators::{Candle, Indicator, ADX, EMA};
use crate::domain::services::strategies::Signal;

#[derive(Debug, Clone)]
pub struct TrendFilterConfig {
    pub adx_period: usize,
    pub adx_threshold: f64,
    pub ema_period: usize,
}

impl Default for TrendFilterConfig {
    fn default() -> Self {
        TrendFilterConfig {
            adx_period: 14,
            adx_threshold: 25.0,
            ema_period: 21,
        }
    }
}

/// Why a filter vetoed a signal
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Pass,
    WeakTrend(f64),
    AgainstTrend { close: f64, ema: f64 },
    Unavailable(IndicatorError),
}

impl FilterVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, FilterVerdict::Pass)
    }
}

pub struct TrendFilters {
    config: TrendFilterConfig,
    adx: ADX,
    ema: EMA,
}

impl TrendFilters {
    pub fn new(config: TrendFilterConfig) -> Self {
        TrendFilters {
            adx: ADX::new(config.adx_period),
            ema: EMA::new(config.ema_period),
            config,
        }
    }

    /// ADX above the threshold on the last bar.
    pub fn strength(&self, candles: &[Candle]) -> FilterVerdict {
        let adx = match self.adx.calculate(candles) {
            Ok(values) => values.last().copied(),
            Err(e) => return FilterVerdict::Unavailable(e),
        };
        match adx {
            Some(adx) if adx > self.config.adx_threshold => FilterVerdict::Pass,
            Some(adx) => FilterVerdict::WeakTrend(adx),
            None => FilterVerdict::Unavailable(IndicatorError::InsufficientData {
                required: 2 * self.config.adx_period,
                available: candles.len(),
            }),
        }
    }

    /// Last close on the signal's side of the EMA.
    pub fn direction(&self, candles: &[Candle], signal: Signal) -> FilterVerdict {
        let ema = match self.ema.calculate(candles) {
            Ok(values) => values.last().copied(),
            Err(e) => return FilterVerdict::Unavailable(e),
        };
        let (Some(ema), Some(close)) = (ema, candles.last().map(|c| c.close.value())) else {
            return FilterVerdict::Unavailable(IndicatorError::InsufficientData {
                required: 1,
                available: 0,
            });
        };

        let aligned = match signal {
            Signal::Long => close > ema,
            Signal::Short => close < ema,
            Signal::None => false,
        };
        if aligned {
            FilterVerdict::Pass
        } else {
            FilterVerdict::AgainstTrend { close, ema }
        }
    }

    /// Both filters. Rejections are logged against `instrument`.
    pub fn allows(&self, instrument: &str, candles: &[Candle], signal: Signal) -> bool {
        if signal == Signal::None {
            return false;
        }

        match self.strength(candles) {
            FilterVerdict::Pass => {}
            FilterVerdict::Unavailable(e) => {
                warn!("{}: ADX unavailable, rejecting {:?}: {}", instrument, signal, e);
                return false;
            }
            verdict => {
                debug!("{}: {:?} rejected by strength filter: {:?}", instrument, signal, verdict);
                return false;
            }
        }

        match self.direction(candles, signal) {
            FilterVerdict::Pass => true,
            FilterVerdict::Unavailable(e) => {
                warn!("{}: EMA unavailable, rejecting {:?}: {}", instrument, signal, e);
                false
            }
            verdict => {
                debug!("{}: {:?} rejected by direction filter: {:?}", instrument, signal, verdict);
                false
            }
        }
    }
}

impl Default for TrendFilters {
    fn default() -> Self {
        Self::new(TrendFilterConfig::default())
    }
}

use tracing::debug;

use crate::domain::services::aggregator::SignalAggregator;
use crate::domain::services::indicators::Candle;
use crate::domain::services::strategies::{Signal, StrategySet};
use crate::domain::services::trend_filters::TrendFilters;

/// Strategy Set -> Aggregator -> Trend Filters
pub struct SignalPipeline {
    pub strategies: StrategySet,
    pub aggregator: SignalAggregator,
    pub filters: TrendFilters,
}

impl SignalPipeline {
    pub fn new(strategies: StrategySet, filters: TrendFilters) -> Self {
        SignalPipeline {
            strategies,
            aggregator: SignalAggregator::new(),
            filters,
        }
    }

    /// Filtered entry signal for the window ending at the last candle.
    pub fn evaluate(&self, instrument: &str, candles: &[Candle]) -> Signal {
        let votes = self.strategies.evaluate(candles);
        let signal = self.aggregator.aggregate(&votes);
        if signal == Signal::None {
            return Signal::None;
        }
        debug!("{}: aggregated {:?} from {:?}", instrument, signal, votes);

        if self.filters.allows(instrument, candles, signal) {
            signal
        } else {
            Signal::None
        }
    }
}

impl Default for SignalPipeline {
    fn default() -> Self {
        Self::new(StrategySet::standard(), TrendFilters::default())
    }
}

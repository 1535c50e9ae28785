use chrono::{DateTime, Utc};

use crate::domain::errors::IndicatorError;
use crate::domain::value_objects::price::Price;

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, String> {
        Ok(Candle {
            timestamp,
            open: Price::new(open)?,
            high: Price::new(high)?,
            low: Price::new(low)?,
            close: Price::new(close)?,
            volume,
        })
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.value()).collect()
}

fn require(candles: usize, required: usize) -> Result<(), IndicatorError> {
    if candles < required {
        Err(IndicatorError::InsufficientData {
            required,
            available: candles,
        })
    } else {
        Ok(())
    }
}

/// Series-producing indicator. Output is aligned to the end of the input:
/// the last value always belongs to the last candle.
pub trait Indicator {
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError>;
}

/// Last two values of a series, oldest first.
pub fn last_two(series: &[f64]) -> Option<(f64, f64)> {
    match series {
        [.., prev, last] => Some((*prev, *last)),
        _ => None,
    }
}

pub struct SMA {
    pub period: usize,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        SMA { period }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Result<Vec<f64>, IndicatorError> {
        if self.period == 0 {
            return Err(IndicatorError::InvalidPeriod(self.period));
        }
        require(values.len(), self.period)?;
        Ok(values
            .windows(self.period)
            .map(|w| w.iter().sum::<f64>() / self.period as f64)
            .collect())
    }
}

impl Indicator for SMA {
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError> {
        self.calculate_on_values(&closes(candles))
    }
}

/// Recursive EMA with `alpha = 2 / (span + 1)`, seeded with the first value.
/// One output per input.
pub struct EMA {
    pub period: usize,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        EMA { period }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Result<Vec<f64>, IndicatorError> {
        if self.period == 0 {
            return Err(IndicatorError::InvalidPeriod(self.period));
        }
        let first = *values.first().ok_or(IndicatorError::InsufficientData {
            required: 1,
            available: 0,
        })?;
        let multiplier = 2.0 / (self.period as f64 + 1.0);

        let mut ema_values = Vec::with_capacity(values.len());
        let mut ema = first;
        ema_values.push(ema);
        for &val in values.iter().skip(1) {
            ema = (val - ema) * multiplier + ema;
            ema_values.push(ema);
        }

        if !ema.is_finite() {
            return Err(IndicatorError::NonFinite("EMA"));
        }
        Ok(ema_values)
    }
}

impl Indicator for EMA {
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError> {
        self.calculate_on_values(&closes(candles))
    }
}

/// RSI over simple rolling means of gains and losses.
pub struct RSI {
    pub period: usize,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        RSI { period }
    }
}

impl Indicator for RSI {
    /// Fails with `DivisionByZero` when the most recent window has no losses.
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError> {
        if self.period == 0 {
            return Err(IndicatorError::InvalidPeriod(self.period));
        }
        require(candles.len(), self.period + 1)?;

        let mut gains = Vec::with_capacity(candles.len() - 1);
        let mut losses = Vec::with_capacity(candles.len() - 1);
        for pair in candles.windows(2) {
            let change = pair[1].close.value() - pair[0].close.value();
            gains.push(change.max(0.0));
            losses.push((-change).max(0.0));
        }

        let avg_gains = SMA::new(self.period).calculate_on_values(&gains)?;
        let avg_losses = SMA::new(self.period).calculate_on_values(&losses)?;

        if avg_losses.last().copied().unwrap_or(0.0) == 0.0 {
            return Err(IndicatorError::DivisionByZero("RSI"));
        }

        Ok(avg_gains
            .iter()
            .zip(avg_losses.iter())
            .map(|(gain, loss)| {
                if *loss == 0.0 {
                    100.0
                } else {
                    100.0 - 100.0 / (1.0 + gain / loss)
                }
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct BollingerBandsValues {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Rolling mean ± `std_dev` sample standard deviations.
pub struct BollingerBands {
    pub period: usize,
    pub std_dev: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        BollingerBands { period, std_dev }
    }

    pub fn calculate_detailed(
        &self,
        candles: &[Candle],
    ) -> Result<BollingerBandsValues, IndicatorError> {
        // Sample deviation needs at least two points
        if self.period < 2 {
            return Err(IndicatorError::InvalidPeriod(self.period));
        }
        require(candles.len(), self.period)?;

        let values = closes(candles);
        let mut upper = Vec::new();
        let mut middle = Vec::new();
        let mut lower = Vec::new();

        for window in values.windows(self.period) {
            let sma = window.iter().sum::<f64>() / self.period as f64;
            let variance = window.iter().map(|v| (v - sma).powi(2)).sum::<f64>()
                / (self.period - 1) as f64;
            let std = variance.sqrt();

            upper.push(sma + self.std_dev * std);
            middle.push(sma);
            lower.push(sma - self.std_dev * std);
        }

        Ok(BollingerBandsValues {
            upper,
            middle,
            lower,
        })
    }
}

impl Indicator for BollingerBands {
    /// Middle band only
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError> {
        Ok(self.calculate_detailed(candles)?.middle)
    }
}

#[derive(Debug, Clone)]
pub struct MacdValues {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

pub struct MACD {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        MACD {
            fast_period,
            slow_period,
            signal_period,
        }
    }

    pub fn calculate_detailed(&self, candles: &[Candle]) -> Result<MacdValues, IndicatorError> {
        require(candles.len(), self.slow_period.max(self.fast_period))?;
        let values = closes(candles);
        let fast_values = EMA::new(self.fast_period).calculate_on_values(&values)?;
        let slow_values = EMA::new(self.slow_period).calculate_on_values(&values)?;

        let macd: Vec<f64> = fast_values
            .iter()
            .zip(slow_values.iter())
            .map(|(f, s)| f - s)
            .collect();
        let signal = EMA::new(self.signal_period).calculate_on_values(&macd)?;

        Ok(MacdValues { macd, signal })
    }
}

impl Indicator for MACD {
    /// Signal line only
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError> {
        Ok(self.calculate_detailed(candles)?.signal)
    }
}

/// Average Directional Index with Wilder smoothing.
///
/// 1. +DM / -DM and true range from consecutive bars
/// 2. the first `period` values are summed, later ones Wilder-smoothed
/// 3. DX = |+DI - -DI| / (+DI + -DI) * 100
/// 4. ADX seeds with the mean of the first `period` DX values, then Wilder-smooths
///
/// Needs `2 * period` candles for the first ADX value.
///
/// Seeding is Wilder's: sums for DM/TR and a plain mean for the first ADX.
/// An RMA (`ewm(alpha = 1/period)`) seeded from the first bar converges to the
/// same series but can differ over short windows, so readings close to the
/// strength threshold may land on the other side of it.
pub struct ADX {
    pub period: usize,
}

impl ADX {
    pub fn new(period: usize) -> Self {
        ADX { period }
    }

    fn directional_index(plus_dm: f64, minus_dm: f64, tr: f64) -> f64 {
        if tr <= 0.0 {
            return 0.0;
        }
        let di_plus = 100.0 * plus_dm / tr;
        let di_minus = 100.0 * minus_dm / tr;
        let di_sum = di_plus + di_minus;
        if di_sum <= 0.0 {
            0.0
        } else {
            100.0 * (di_plus - di_minus).abs() / di_sum
        }
    }
}

impl Indicator for ADX {
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, IndicatorError> {
        if self.period == 0 {
            return Err(IndicatorError::InvalidPeriod(self.period));
        }
        require(candles.len(), 2 * self.period)?;
        let n = self.period as f64;

        let mut plus_dms = Vec::with_capacity(candles.len() - 1);
        let mut minus_dms = Vec::with_capacity(candles.len() - 1);
        let mut trs = Vec::with_capacity(candles.len() - 1);
        for pair in candles.windows(2) {
            let (prev, curr) = (&pair[0], &pair[1]);
            let up = curr.high.value() - prev.high.value();
            let down = prev.low.value() - curr.low.value();
            plus_dms.push(if up > down && up > 0.0 { up } else { 0.0 });
            minus_dms.push(if down > up && down > 0.0 { down } else { 0.0 });
            let tr = (curr.high.value() - curr.low.value())
                .max((curr.high.value() - prev.close.value()).abs())
                .max((curr.low.value() - prev.close.value()).abs());
            trs.push(tr);
        }

        let mut smoothed_plus: f64 = plus_dms[..self.period].iter().sum();
        let mut smoothed_minus: f64 = minus_dms[..self.period].iter().sum();
        let mut smoothed_tr: f64 = trs[..self.period].iter().sum();

        let mut dxs = vec![Self::directional_index(
            smoothed_plus,
            smoothed_minus,
            smoothed_tr,
        )];
        for i in self.period..trs.len() {
            smoothed_plus = smoothed_plus - smoothed_plus / n + plus_dms[i];
            smoothed_minus = smoothed_minus - smoothed_minus / n + minus_dms[i];
            smoothed_tr = smoothed_tr - smoothed_tr / n + trs[i];
            dxs.push(Self::directional_index(
                smoothed_plus,
                smoothed_minus,
                smoothed_tr,
            ));
        }

        if dxs.len() < self.period {
            return Err(IndicatorError::InsufficientData {
                required: 2 * self.period,
                available: candles.len(),
            });
        }

        let mut adx = dxs[..self.period].iter().sum::<f64>() / n;
        let mut adx_values = vec![adx];
        for dx in &dxs[self.period..] {
            adx = (adx * (n - 1.0) + dx) / n;
            adx_values.push(adx);
        }

        if !adx.is_finite() {
            return Err(IndicatorError::NonFinite("ADX"));
        }
        Ok(adx_values)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_sma_calculation() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let values = SMA::new(2).calculate(&candles).unwrap();
        assert_eq!(values, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let values = EMA::new(3).calculate_on_values(&[10.0, 20.0, 20.0]).unwrap();
        // alpha = 0.5
        assert_eq!(values, vec![10.0, 15.0, 17.5]);
    }

    #[test]
    fn test_ema_empty_input_fails() {
        assert!(EMA::new(3).calculate_on_values(&[]).is_err());
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let values = RSI::new(14).calculate(&candles_from_closes(&closes)).unwrap();
        assert_eq!(*values.last().unwrap(), 0.0);
    }

    #[test]
    fn test_rsi_no_losses_is_division_by_zero() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let result = RSI::new(14).calculate(&candles_from_closes(&closes));
        assert_eq!(result, Err(IndicatorError::DivisionByZero("RSI")));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let closes = vec![100.0; 14];
        let result = RSI::new(14).calculate(&candles_from_closes(&closes));
        assert_eq!(
            result,
            Err(IndicatorError::InsufficientData {
                required: 15,
                available: 14
            })
        );
    }

    #[test]
    fn test_bollinger_uses_sample_deviation() {
        let mut closes = vec![100.0; 19];
        closes.push(110.0);
        let bands = BollingerBands::new(20, 2.0)
            .calculate_detailed(&candles_from_closes(&closes))
            .unwrap();
        // mean 100.5, sample std sqrt(5)
        assert!((bands.middle[0] - 100.5).abs() < 1e-9);
        assert!((bands.upper[0] - (100.5 + 2.0 * 5f64.sqrt())).abs() < 1e-9);
    }

    #[test]
    fn test_macd_lengths_align() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).sin()).collect();
        let values = MACD::new(12, 26, 9)
            .calculate_detailed(&candles_from_closes(&closes))
            .unwrap();
        assert_eq!(values.macd.len(), 40);
        assert_eq!(values.signal.len(), 40);
    }

    #[test]
    fn test_adx_strong_uptrend_is_high() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + 2.0 * i as f64).collect();
        let values = ADX::new(14).calculate(&candles_from_closes(&closes)).unwrap();
        assert!(*values.last().unwrap() > 90.0);
    }

    #[test]
    fn test_adx_choppy_market_is_low() {
        let bars: Vec<(f64, f64, f64)> = (0..60)
            .map(|i| {
                if i % 2 == 0 {
                    (102.0, 98.0, 100.0)
                } else {
                    (103.0, 97.0, 100.0)
                }
            })
            .collect();
        let values = ADX::new(14).calculate(&candles_from_hlc(&bars)).unwrap();
        assert!(*values.last().unwrap() < 25.0);
    }

    #[test]
    fn test_adx_needs_two_periods() {
        let closes = vec![100.0; 27];
        assert!(ADX::new(14).calculate(&candles_from_closes(&closes)).is_err());
    }

    #[test]
    fn test_last_two() {
        assert_eq!(last_two(&[1.0, 2.0, 3.0]), Some((2.0, 3.0)));
        assert_eq!(last_two(&[1.0]), None);
    }
}

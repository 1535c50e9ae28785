use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::repositories::candle_source::RetryPolicy;
use crate::domain::services::session_governor::GovernorPolicy;
use crate::domain::services::trend_filters::TrendFilterConfig;
use crate::domain::value_objects::position_sizing::RiskPolicy;

const MAX_COOLDOWN_MINUTES: i64 = 7 * 24 * 60;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Instruments evaluated each tick, in order (e.g., "SOL/USDT")
    pub instruments: Vec<String>,
    pub resolution: String,
    /// Candles fetched per evaluation
    pub candle_window: usize,
    pub default_leverage: f64,
    pub leverage_overrides: HashMap<String, f64>,
    pub max_open_positions: usize,
    pub cooldown_minutes: i64,
    /// Paper balance at startup
    pub initial_balance: f64,
    pub risk: RiskPolicy,
    pub governor: GovernorPolicy,
    pub filters: TrendFilterConfig,
    pub fetch_retry: RetryPolicy,
    pub trade_retention: usize,
    pub error_log_retention: usize,
    pub tick_interval_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        let instruments = vec!["SOL/USDT".to_string(), "LTC/USDT".to_string()];
        let leverage_overrides = instruments.iter().map(|i| (i.clone(), 100.0)).collect();

        TradingConfig {
            instruments,
            resolution: "5m".to_string(),
            candle_window: 100,
            default_leverage: 10.0,
            leverage_overrides,
            max_open_positions: 1,
            cooldown_minutes: 30,
            initial_balance: 100.0,
            risk: RiskPolicy::default(),
            governor: GovernorPolicy::default(),
            filters: TrendFilterConfig::default(),
            fetch_retry: RetryPolicy::default(),
            trade_retention: 100,
            error_log_retention: 10,
            tick_interval_secs: 300,
        }
    }
}

/// Parses `name` if set, keeping `current` (with a warning) when the value is
/// unparsable or rejected by `valid`.
fn env_override<T>(name: &str, current: &mut T, valid: impl Fn(&T) -> bool)
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => *current = value,
        Ok(value) => {
            tracing::warn!("Invalid {} value: {}, using default: {}", name, value, current);
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default: {}", name, raw, e, current);
        }
    }
}

/// Up to one week, so `cooldown()` stays far inside chrono's range.
fn valid_cooldown_minutes(minutes: &i64) -> bool {
    (0..=MAX_COOLDOWN_MINUTES).contains(minutes)
}

/// Parses "SOL/USDT=100,LTC/USDT=50".
pub fn parse_leverage_overrides(raw: &str) -> Result<HashMap<String, f64>, String> {
    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (instrument, leverage) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected INSTRUMENT=LEVERAGE, got '{}'", entry))?;
        let leverage: f64 = leverage
            .trim()
            .parse()
            .map_err(|e| format!("bad leverage for {}: {}", instrument, e))?;
        if !leverage.is_finite() || leverage <= 0.0 {
            return Err(format!("leverage for {} must be positive", instrument));
        }
        overrides.insert(instrument.trim().to_string(), leverage);
    }
    Ok(overrides)
}

impl TradingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> TradingConfig {
        let mut config = TradingConfig::default();

        if let Ok(raw) = std::env::var("INSTRUMENTS") {
            let instruments: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if instruments.is_empty() {
                tracing::warn!("INSTRUMENTS is empty, using default: {:?}", config.instruments);
            } else {
                config.instruments = instruments;
            }
        }

        if let Ok(resolution) = std::env::var("RESOLUTION") {
            config.resolution = resolution;
        }

        if let Ok(raw) = std::env::var("LEVERAGE_OVERRIDES") {
            match parse_leverage_overrides(&raw) {
                Ok(overrides) => config.leverage_overrides = overrides,
                Err(e) => tracing::warn!("Invalid LEVERAGE_OVERRIDES: {}, using defaults", e),
            }
        }

        env_override("CANDLE_WINDOW", &mut config.candle_window, |v| *v >= 50);
        env_override("DEFAULT_LEVERAGE", &mut config.default_leverage, |v| {
            v.is_finite() && *v > 0.0
        });
        env_override("MAX_OPEN_POSITIONS", &mut config.max_open_positions, |v| *v > 0);
        env_override(
            "TRADE_COOLDOWN_MINUTES",
            &mut config.cooldown_minutes,
            valid_cooldown_minutes,
        );
        env_override("INITIAL_BALANCE", &mut config.initial_balance, |v| {
            v.is_finite() && *v > 0.0
        });
        env_override("MARGIN_PCT_OF_CAPITAL", &mut config.risk.margin_pct, |v| {
            *v > 0.0 && *v <= 1.0
        });
        env_override("RISK_PCT_OF_MARGIN", &mut config.risk.risk_pct, |v| *v > 0.0);
        env_override("REWARD_MULTIPLIER", &mut config.risk.reward_multiplier, |v| *v > 0.0);
        env_override(
            "DAILY_PROFIT_TARGET",
            &mut config.governor.daily_profit_target,
            |v| *v > 0.0,
        );
        env_override(
            "MAX_CONSECUTIVE_LOSSES",
            &mut config.governor.max_consecutive_losses,
            |v| *v > 0,
        );
        env_override(
            "MAX_LOSS_LIMIT_DAYS",
            &mut config.governor.max_loss_limit_days,
            |v| *v > 0,
        );
        env_override("ADX_THRESHOLD", &mut config.filters.adx_threshold, |v| {
            (0.0..=100.0).contains(v)
        });
        env_override("API_MAX_RETRIES", &mut config.fetch_retry.attempts, |v| *v > 0);

        let mut retry_delay_secs = config.fetch_retry.delay.as_secs();
        env_override("API_RETRY_DELAY", &mut retry_delay_secs, |v| *v <= 300);
        config.fetch_retry.delay = Duration::from_secs(retry_delay_secs);

        env_override("MAX_TRADE_HISTORY", &mut config.trade_retention, |v| *v > 0);
        env_override("MAX_ERROR_LOGS", &mut config.error_log_retention, |v| *v > 0);
        env_override("TICK_INTERVAL_SECONDS", &mut config.tick_interval_secs, |v| {
            *v >= 10 && *v <= 3600
        });

        config
    }

    /// Per-instrument override, else the default leverage.
    pub fn leverage_for(&self, instrument: &str) -> f64 {
        self.leverage_overrides
            .get(instrument)
            .copied()
            .unwrap_or(self.default_leverage)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes)
    }
}

/// Operator API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Heartbeat age after which the engine is reported stalled
    pub stale_after_minutes: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            bind_addr: "0.0.0.0:5000".to_string(),
            stale_after_minutes: 7,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let mut config = ApiConfig::default();
        if let Ok(addr) = std::env::var("API_BIND_ADDR") {
            config.bind_addr = addr;
        }
        env_override(
            "HEARTBEAT_STALE_MINUTES",
            &mut config.stale_after_minutes,
            |v| *v > 0,
        );
        config
    }
}

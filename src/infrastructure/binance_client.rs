//! Binance USDⓈ-M futures market data
//!
//! Public endpoints only: klines for the candle source and exchangeInfo for the
//! startup instrument check. Requests are paced by a governor rate limiter.

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::errors::MarketDataError;
use crate::domain::repositories::candle_source::CandleSource;
use crate::domain::services::indicators::Candle;

const BINANCE_FUTURES_BASE: &str = "https://fapi.binance.com";

type Limiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_base: String,
    pub requests_per_minute: u32,
    pub timeout: Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_base: BINANCE_FUTURES_BASE.to_string(),
            requests_per_minute: 600,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

pub struct BinanceFuturesClient {
    client: Client,
    config: BinanceConfig,
    limiter: Limiter,
}

/// "SOL/USDT" -> "SOLUSDT"
pub fn exchange_symbol(instrument: &str) -> String {
    instrument.replace(['/', '-'], "").to_uppercase()
}

/// Maps an HTTP status to the retry classification.
pub fn classify_status(status: StatusCode, body: &str) -> MarketDataError {
    let message = format!("HTTP {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
        || status.as_u16() == 418
    {
        MarketDataError::Transient(message)
    } else {
        MarketDataError::Permanent(message)
    }
}

fn classify_transport(e: reqwest::Error) -> MarketDataError {
    if e.is_builder() {
        MarketDataError::Permanent(e.to_string())
    } else if e.is_decode() {
        MarketDataError::Malformed(e.to_string())
    } else {
        MarketDataError::Transient(e.to_string())
    }
}

fn field_f64(row: &[Value], index: usize) -> Result<f64, MarketDataError> {
    match row.get(index) {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| MarketDataError::Malformed(format!("field {} is not numeric: {}", index, s))),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| MarketDataError::Malformed(format!("field {} out of range", index))),
        _ => Err(MarketDataError::Malformed(format!("missing field {}", index))),
    }
}

/// Parses a klines payload: `[[open_time_ms, "o", "h", "l", "c", "v", ...], ...]`.
pub fn parse_klines(payload: &Value) -> Result<Vec<Candle>, MarketDataError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| MarketDataError::Malformed("klines payload is not an array".into()))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let row = row
            .as_array()
            .ok_or_else(|| MarketDataError::Malformed("kline row is not an array".into()))?;
        let open_time = row
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| MarketDataError::Malformed("missing open time".into()))?;
        let timestamp = Utc
            .timestamp_millis_opt(open_time)
            .single()
            .ok_or_else(|| MarketDataError::Malformed(format!("bad open time {}", open_time)))?;

        let candle = Candle::new(
            timestamp,
            field_f64(row, 1)?,
            field_f64(row, 2)?,
            field_f64(row, 3)?,
            field_f64(row, 4)?,
            field_f64(row, 5)?,
        )
        .map_err(MarketDataError::Malformed)?;

        if let Some(prev) = candles.last().map(|c: &Candle| c.timestamp) {
            if candle.timestamp <= prev {
                return Err(MarketDataError::Malformed(format!(
                    "timestamps not increasing at {}",
                    candle.timestamp
                )));
            }
        }
        candles.push(candle);
    }
    Ok(candles)
}

impl BinanceFuturesClient {
    pub fn new(config: BinanceConfig) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MarketDataError::Permanent(format!("HTTP client: {}", e)))?;
        let per_minute = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| MarketDataError::Permanent("requests_per_minute must be non-zero".into()))?;
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, MarketDataError> {
        self.limiter.until_ready().await;

        let url = format!("{}{}", self.config.api_base, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response.json::<Value>().await.map_err(classify_transport)
    }

    /// Verifies every instrument is listed and trading. Called once at startup.
    pub async fn load_markets(&self, instruments: &[String]) -> Result<(), MarketDataError> {
        let payload = self.get_json("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo = serde_json::from_value(payload)
            .map_err(|e| MarketDataError::Malformed(format!("exchangeInfo: {}", e)))?;

        let trading: HashSet<&str> = info
            .symbols
            .iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol.as_str())
            .collect();

        for instrument in instruments {
            let symbol = exchange_symbol(instrument);
            if !trading.contains(symbol.as_str()) {
                return Err(MarketDataError::Permanent(format!(
                    "{} ({}) is not a trading futures market",
                    instrument, symbol
                )));
            }
        }
        info!("✓ Markets loaded: {}", instruments.join(", "));
        Ok(())
    }
}

#[async_trait]
impl CandleSource for BinanceFuturesClient {
    async fn fetch(
        &self,
        instrument: &str,
        resolution: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let symbol = exchange_symbol(instrument);
        let payload = self
            .get_json(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol),
                    ("interval", resolution.to_string()),
                    ("limit", count.to_string()),
                ],
            )
            .await?;
        let candles = parse_klines(&payload)?;
        debug!("Fetched {} {} candles for {}", candles.len(), resolution, instrument);
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("SOL/USDT"), "SOLUSDT");
        assert_eq!(exchange_symbol("ltc-usdt"), "LTCUSDT");
    }

    #[test]
    fn test_parse_klines() {
        let payload = json!([
            [1709251200000i64, "100.0", "101.5", "99.5", "101.0", "1234.5", 1709251499999i64, "0", 10, "0", "0", "0"],
            [1709251500000i64, "101.0", "102.0", "100.5", "101.8", "987.0", 1709251799999i64, "0", 8, "0", "0", "0"]
        ]);
        let candles = parse_klines(&payload).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high.value(), 101.5);
        assert_eq!(candles[1].close.value(), 101.8);
        assert_eq!(candles[0].timestamp.timestamp_millis(), 1709251200000);
        assert_eq!(candles[1].volume, 987.0);
    }

    #[test]
    fn test_parse_klines_rejects_garbage() {
        assert!(matches!(
            parse_klines(&json!({"code": -1121})),
            Err(MarketDataError::Malformed(_))
        ));
        assert!(matches!(
            parse_klines(&json!([[1709251200000i64, "abc", "1", "1", "1", "1"]])),
            Err(MarketDataError::Malformed(_))
        ));
        assert!(matches!(
            parse_klines(&json!([
                [1709251500000i64, "1", "1", "1", "1", "1"],
                [1709251200000i64, "1", "1", "1", "1", "1"]
            ])),
            Err(MarketDataError::Malformed(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "Invalid symbol").is_retryable());
    }

    #[test]
    fn test_client_rejects_zero_rate() {
        let config = BinanceConfig {
            requests_per_minute: 0,
            ..BinanceConfig::default()
        };
        assert!(BinanceFuturesClient::new(config).is_err());
    }
}

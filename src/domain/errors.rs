use thiserror::Error;

/// Indicator computation failures. Callers treat every variant as "no signal".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),

    #[error("non-finite value produced by {0}")]
    NonFinite(&'static str),

    #[error("invalid period {0}")]
    InvalidPeriod(usize),
}

/// Candle source failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketDataError {
    /// Network error, timeout, rate limit or server-side failure. Worth retrying.
    #[error("transient market data error: {0}")]
    Transient(String),

    /// Bad symbol, bad request. Retrying will not help.
    #[error("permanent market data error: {0}")]
    Permanent(String),

    #[error("no candles returned for {0}")]
    Empty(String),

    #[error("malformed candle payload: {0}")]
    Malformed(String),
}

impl MarketDataError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketDataError::Transient(_) | MarketDataError::Empty(_)
        )
    }
}

/// Position sizing rejections
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SizingError {
    #[error("invalid entry price {0}")]
    InvalidPrice(f64),

    #[error("invalid leverage {0}")]
    InvalidLeverage(f64),

    #[error("invalid position size {0}")]
    InvalidSize(f64),
}

/// Reasons the position ledger refuses a new entry
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntryRejection {
    #[error("{0} already has an open trade")]
    AlreadyOpen(String),

    #[error("sizing rejected: {0}")]
    Sizing(#[from] SizingError),
}

/// Failures surfaced by a `TradingStore` implementation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

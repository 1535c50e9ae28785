pub mod candle_source;
pub mod trading_store;

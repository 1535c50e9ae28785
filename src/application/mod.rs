pub mod backtest;
pub mod engine;
pub mod scheduler;

pub mod aggregator;
pub mod indicators;
pub mod position_ledger;
pub mod position_sizer;
pub mod session_governor;
pub mod signal_pipeline;
pub mod strategies;
pub mod trend_filters;

//! Aladdin Trading Engine Library
//!
//! Strategy-signal paper trading: candle polling, five-strategy vote, trend
//! filters, fixed-risk sizing, position tracking and day-scoped risk limits.

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;

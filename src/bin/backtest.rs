//! Replays a candle CSV through the live strategy pipeline.
//!
//! ```text
//! backtest --csv SOL_USDT_5m.csv --instrument SOL/USDT --leverage 100
//! ```

use std::fs::File;
use std::path::PathBuf;

use aladdin::application::backtest::{load_candles_csv, BacktestConfig, Backtester};
use aladdin::application::engine::TradingEngine;
use aladdin::config::TradingConfig;
use aladdin::domain::value_objects::position_sizing::RiskPolicy;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "backtest", about = "Replay historical candles through the Aladdin strategy set")]
struct Cli {
    /// CSV with ts,open,high,low,close,vol columns, oldest first.
    #[arg(long)]
    csv: PathBuf,

    /// Instrument label used in logs and the report.
    #[arg(long, default_value = "SOL/USDT")]
    instrument: String,

    #[arg(long, default_value_t = 100.0)]
    balance: f64,

    #[arg(long, default_value_t = 100.0)]
    leverage: f64,

    #[arg(long, default_value_t = 0.02)]
    margin_pct: f64,

    #[arg(long, default_value_t = 0.5)]
    risk_pct: f64,

    #[arg(long, default_value_t = 2.0)]
    reward_mult: f64,

    /// Bars skipped before the first evaluation.
    #[arg(long, default_value_t = 50)]
    warmup: usize,

    /// Trailing bars evaluated per step.
    #[arg(long, default_value_t = 100)]
    window: usize,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aladdin=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let risk = RiskPolicy::new(cli.margin_pct, cli.risk_pct, cli.reward_mult)?;

    let candles = load_candles_csv(File::open(&cli.csv)?)?;
    println!("Data loaded: {} candles.", candles.len());
    if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
        println!("Coverage: {}  ->  {}  (UTC)", first.timestamp, last.timestamp);
    }

    let config = BacktestConfig {
        instrument: cli.instrument,
        initial_balance: cli.balance,
        leverage: cli.leverage,
        risk,
        warmup: cli.warmup,
        window: cli.window,
    };
    let pipeline = TradingEngine::standard_pipeline(&TradingConfig::default());
    let report = Backtester::new(config, pipeline).run(&candles);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Backtest Results for {} ===", report.instrument);
    println!("Trades taken: {}", report.trades);
    println!("Wins: {} | Losses: {}", report.wins, report.losses);
    println!("Win rate: {:.2}%", report.win_rate);
    println!(
        "Final Balance: ${:.2} (Start: ${:.2})",
        report.final_balance, report.starting_balance
    );
    Ok(())
}

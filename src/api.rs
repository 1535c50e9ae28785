//! Read-only operator API
//!
//! Serves engine liveness, performance, recent trades and recent error logs
//! from the store, plus the live account snapshot published by the engine.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::application::engine::EngineSnapshot;
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::errors::StoreError;
use crate::domain::repositories::trading_store::{TradingStore, HEARTBEAT_KEY};

/// Rows shown by `/api/trades`
pub const RECENT_TRADES_LIMIT: usize = 100;
/// Rows shown by `/api/error_logs`
pub const RECENT_ERRORS_LIMIT: usize = 10;
/// Upper bound on trades read for performance figures
const PERFORMANCE_SCAN_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn TradingStore>,
    pub snapshot: watch::Receiver<EngineSnapshot>,
    pub stale_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeartbeatStatus {
    #[serde(rename = "Starting...")]
    Starting,
    Running,
    Stalled,
}

/// Running while the last heartbeat is younger than `stale_after`.
pub fn heartbeat_status(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> HeartbeatStatus {
    match last {
        None => HeartbeatStatus::Starting,
        Some(at) if now - at < stale_after => HeartbeatStatus::Running,
        Some(_) => HeartbeatStatus::Stalled,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub wins: usize,
    pub losses: usize,
    pub total_trades: usize,
    pub win_percentage: f64,
    pub pnl_today: f64,
    pub pnl_this_month: f64,
    pub pnl_this_year: f64,
}

impl PerformanceSummary {
    /// Closed-trade statistics. Periods are UTC and keyed on the entry time.
    pub fn from_trades(trades: &[Trade], now: DateTime<Utc>) -> Self {
        let closed: Vec<&Trade> = trades.iter().filter(|t| t.status.is_closed()).collect();
        let wins = closed.iter().filter(|t| t.status == TradeStatus::Win).count();
        let losses = closed.len() - wins;
        let total_trades = closed.len();
        let win_percentage = if total_trades > 0 {
            wins as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let pnl_where = |keep: &dyn Fn(&DateTime<Utc>) -> bool| -> f64 {
            closed
                .iter()
                .filter(|t| keep(&t.opened_at))
                .filter_map(|t| t.realized_pnl)
                .sum()
        };
        let today = now.date_naive();

        PerformanceSummary {
            wins,
            losses,
            total_trades,
            win_percentage,
            pnl_today: pnl_where(&|at| at.date_naive() == today),
            pnl_this_month: pnl_where(&|at| at.year() == now.year() && at.month() == now.month()),
            pnl_this_year: pnl_where(&|at| at.year() == now.year()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: HeartbeatStatus,
    last_heartbeat: Option<DateTime<Utc>>,
    session: crate::domain::services::session_governor::SessionState,
    last_tick: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct PerformanceResponse {
    #[serde(flatten)]
    summary: PerformanceSummary,
    account: crate::domain::entities::account::AccountSnapshot,
    open_trades: Vec<Trade>,
}

#[derive(Debug, Serialize)]
struct ErrorLogsResponse {
    errors: Vec<String>,
}

/// Store failures surface as 500 with a JSON body
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API store error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "status": "error", "message": self.0.to_string() })),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/performance", get(get_performance))
        .route("/api/trades", get(get_trades))
        .route("/api/error_logs", get(get_error_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let last_heartbeat = state
        .store
        .get_status(HEARTBEAT_KEY)
        .await?
        .map(|entry| entry.last_updated);
    let snapshot = state.snapshot.borrow().clone();

    Ok(Json(StatusResponse {
        status: heartbeat_status(last_heartbeat, Utc::now(), state.stale_after),
        last_heartbeat,
        session: snapshot.session,
        last_tick: snapshot.last_tick,
    }))
}

async fn get_performance(
    State(state): State<ApiState>,
) -> Result<Json<PerformanceResponse>, ApiError> {
    let trades = state.store.recent_trades(PERFORMANCE_SCAN_LIMIT).await?;
    let snapshot = state.snapshot.borrow().clone();

    Ok(Json(PerformanceResponse {
        summary: PerformanceSummary::from_trades(&trades, Utc::now()),
        account: snapshot.account,
        open_trades: snapshot.open_trades,
    }))
}

async fn get_trades(State(state): State<ApiState>) -> Result<Json<Vec<Trade>>, ApiError> {
    Ok(Json(state.store.recent_trades(RECENT_TRADES_LIMIT).await?))
}

async fn get_error_logs(
    State(state): State<ApiState>,
) -> Result<Json<ErrorLogsResponse>, ApiError> {
    let errors = state
        .store
        .recent_error_logs(RECENT_ERRORS_LIMIT)
        .await?
        .into_iter()
        .map(|entry| {
            format!(
                "[{}] {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.message
            )
        })
        .collect();
    Ok(Json(ErrorLogsResponse { errors }))
}

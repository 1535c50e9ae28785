//! Wall-clock tick driver for the engine.

use std::future::Future;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{error, info};

use crate::application::engine::TradingEngine;
use crate::domain::services::session_governor::SessionState;

/// Why the run loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// External shutdown signal
    Stopped,
    /// Governance shutdown; the process must not restart on its own
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct TickScheduler {
    interval: Duration,
}

impl TickScheduler {
    /// `interval_secs` of zero is treated as one second.
    pub fn new(interval_secs: u64) -> Self {
        let secs = i64::try_from(interval_secs.max(1)).unwrap_or(i64::MAX);
        TickScheduler {
            interval: Duration::seconds(secs),
        }
    }

    /// First interval boundary (aligned to the Unix epoch) strictly after `now`.
    pub fn next_tick_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.interval.num_seconds();
        let secs = now.timestamp();
        let next = (secs.div_euclid(step) + 1) * step;
        Utc.timestamp_opt(next, 0).single().unwrap_or(now + self.interval)
    }

    /// Ticks once immediately, then at every boundary, until `shutdown` resolves
    /// or the engine reaches `SessionState::Shutdown`.
    pub async fn run<F>(&self, engine: &mut TradingEngine, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let outcome = engine.tick(Utc::now()).await;
            if outcome.session == SessionState::Shutdown {
                error!("Engine reached shutdown state");
                return RunOutcome::Shutdown;
            }

            let now = Utc::now();
            let next = self.next_tick_after(now);
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping tick loop");
                    return RunOutcome::Stopped;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

//! Timeout scheduler — a single jittered timer driving `Engine::tick`.
//!
//! Each round waits a fresh random delay in `[0, max_poll_interval]`, runs
//! one tick, then re-arms. Ticks never overlap. Cancelling stops the
//! pending wait; a tick already running is allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, RngCore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MAX_POLL_INTERVAL_SECONDS;
use crate::engine::Engine;

/// Uniform in `[0, max_seconds]`; zero when the bound is zero or invalid.
/// Bounds above [`MAX_POLL_INTERVAL_SECONDS`] are clamped to it.
pub fn poll_delay(max_seconds: f64, rng: &mut dyn RngCore) -> Duration {
    if !max_seconds.is_finite() || max_seconds <= 0.0 {
        return Duration::ZERO;
    }
    let max_seconds = max_seconds.min(MAX_POLL_INTERVAL_SECONDS);
    Duration::try_from_secs_f64(rng.gen_range(0.0..=max_seconds))
        .unwrap_or(Duration::from_secs_f64(MAX_POLL_INTERVAL_SECONDS))
}

pub struct Scheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(engine: Arc<Engine>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(engine, token.clone()));
        info!("timeout scheduler started");
        Self { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Abort the pending timer and wait for an in-flight tick to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("timeout scheduler ended abnormally: {}", e);
        }
        info!("timeout scheduler stopped");
    }
}

async fn run(engine: Arc<Engine>, token: CancellationToken) {
    loop {
        let delay = engine.next_delay().await;
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        engine.tick(Utc::now()).await;
    }
}

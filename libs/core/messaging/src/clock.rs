//! Injectable time source.
//!
//! Every wait in this crate (inter-attempt delays, per-attempt timeouts,
//! connection polling, bootstrap delays) goes through a [`Clock`] so tests can
//! drive time deterministically.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of sleeps for retry and polling loops.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer. Works with `tokio::time::pause`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared handle to the default clock.
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}

/// Clock that records every requested sleep and returns after a single yield.
///
/// Useful for asserting the exact delay sequence a retry loop asked for.
#[derive(Debug, Clone, Default)]
pub struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// All durations requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

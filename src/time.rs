//! Time capability used by the polling loops.

use async_trait::async_trait;
use std::time::Duration;

/// Trait for time operations
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait TimeProvider: Send + Sync {
    /// Sleep for a specified duration in milliseconds
    async fn sleep_ms(&self, ms: u64);
}

/// Sleeps on the tokio timer, so paused test clocks advance instantly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTime;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl TimeProvider for TokioTime {
    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

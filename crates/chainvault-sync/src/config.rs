//! Sync engine configuration.

use std::time::Duration;

/// Timing and bounds for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sleep between polls once caught up.
    pub poll_interval: Duration,
    /// First backoff after a failed pass; doubles per consecutive failure.
    pub retry_backoff: Duration,
    /// Upper bound for the backoff.
    pub max_backoff: Duration,
    /// Pause between consecutive heights while catching up.
    pub block_delay: Duration,
    /// Never sync past this height.
    pub max_height: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            block_delay: Duration::from_millis(100),
            max_height: None,
        }
    }
}

impl SyncConfig {
    /// No pauses at all. Meant for tests and local fixtures.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            block_delay: Duration::ZERO,
            max_height: None,
        }
    }
}

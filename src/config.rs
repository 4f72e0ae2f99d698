use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, RowSetError};

pub const DEFAULT_FETCH_SIZE: usize = 30;
/// Upper bound on intermediate boundary probes when jumping to a far batch.
pub const MAX_INTERMEDIATE_PROBES: usize = 5;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Tuning knobs of a row set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RowSetConfig {
    pub fetch_size: usize,
    pub max_intermediate_probes: usize,
    /// Delay between `close()` and the live cursor actually being released.
    pub close_delay_ms: u64,
    /// Idle time after which the live cursor is released; 0 keeps it open.
    pub idle_timeout_ms: u64,
}

impl Default for RowSetConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            max_intermediate_probes: MAX_INTERMEDIATE_PROBES,
            close_delay_ms: 0,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl RowSetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(RowSetError::InvalidConfig(
                "fetch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.close_delay_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

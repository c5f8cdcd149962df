//! Batch manager configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// Limits and timing for the batching engine.
///
/// All values have conservative defaults; override them with the chainable
/// `with_*` setters. The configuration is validated when the manager is
/// built.
#[derive(Debug, Clone)]
pub struct BatchManagerConfig {
    /// Maximum number of entries a single downstream batch call may carry.
    pub max_batch_items: usize,
    /// Maximum cumulative payload size of one batch in bytes; 0 disables
    /// byte-based flushing.
    pub max_batch_bytes_size: usize,
    /// Maximum number of pending entries buffered per batch key.
    pub max_buffer_size: usize,
    /// Maximum number of distinct batch keys.
    pub max_batch_keys: usize,
    /// Interval of the per-partition scheduled flush.
    pub send_request_frequency: Duration,
}

impl Default for BatchManagerConfig {
    fn default() -> Self {
        Self {
            max_batch_items: 10,
            max_batch_bytes_size: 0,
            max_buffer_size: 500,
            max_batch_keys: 100,
            send_request_frequency: Duration::from_millis(200),
        }
    }
}

impl BatchManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_items(mut self, max_batch_items: usize) -> Self {
        self.max_batch_items = max_batch_items;
        self
    }

    pub fn with_max_batch_bytes_size(mut self, max_batch_bytes_size: usize) -> Self {
        self.max_batch_bytes_size = max_batch_bytes_size;
        self
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_max_batch_keys(mut self, max_batch_keys: usize) -> Self {
        self.max_batch_keys = max_batch_keys;
        self
    }

    pub fn with_send_request_frequency(mut self, send_request_frequency: Duration) -> Self {
        self.send_request_frequency = send_request_frequency;
        self
    }

    /// True when byte-threshold flushing is configured.
    pub fn byte_flushing_enabled(&self) -> bool {
        self.max_batch_bytes_size > 0
    }

    /// Checks the limits a manager cannot operate without.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_items == 0 {
            return Err(Error::configuration("max_batch_items must be positive"));
        }
        if self.max_buffer_size == 0 {
            return Err(Error::configuration("max_buffer_size must be positive"));
        }
        if self.max_batch_keys == 0 {
            return Err(Error::configuration("max_batch_keys must be positive"));
        }
        if self.send_request_frequency.is_zero() {
            return Err(Error::configuration(
                "send_request_frequency must be positive",
            ));
        }
        Ok(())
    }
}

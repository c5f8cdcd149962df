//! Flush extraction.

use super::buffer::{BatchEntry, RequestBatchBuffer};
use super::policy::FlushPolicy;

/// Applies a [`FlushPolicy`] to a buffer to produce the entries of a due
/// flush.
///
/// All three entry points accept a missing buffer (the partition may not
/// exist yet) and signal "nothing to do" with an empty vec, never an error.
pub struct BatchRequestExtractor {
    flush_policy: FlushPolicy,
}

impl BatchRequestExtractor {
    pub fn new(flush_policy: FlushPolicy) -> Self {
        Self { flush_policy }
    }

    /// Reactive path, checked right after an insert.
    pub fn extract_flushable_requests<Q, R>(
        &self,
        buffer: Option<&RequestBatchBuffer<Q, R>>,
    ) -> Vec<(String, BatchEntry<Q, R>)> {
        let Some(buffer) = buffer else {
            return Vec::new();
        };
        if buffer.is_empty() {
            return Vec::new();
        }
        if self.flush_policy.should_flush(buffer) {
            buffer.extract_entries(self.flush_policy.flushable_entry_count(buffer))
        } else {
            Vec::new()
        }
    }

    /// Pre-insert path, checked before an arrival that may cross the byte
    /// limit.
    pub fn extract_flushable_requests_before_add<Q, R>(
        &self,
        buffer: Option<&RequestBatchBuffer<Q, R>>,
        incoming_bytes: Option<usize>,
    ) -> Vec<(String, BatchEntry<Q, R>)> {
        let Some(buffer) = buffer else {
            return Vec::new();
        };
        if self
            .flush_policy
            .should_flush_before_add(buffer, incoming_bytes)
        {
            buffer.extract_entries(self.flush_policy.flushable_entry_count(buffer))
        } else {
            Vec::new()
        }
    }

    /// Timer path: takes whatever is present up to the item ceiling,
    /// ignoring byte thresholds, so sparse buffers still have bounded
    /// latency.
    pub fn extract_scheduled_flushable_requests<Q, R>(
        &self,
        buffer: Option<&RequestBatchBuffer<Q, R>>,
        max_batch_items: usize,
    ) -> Vec<(String, BatchEntry<Q, R>)> {
        let Some(buffer) = buffer else {
            return Vec::new();
        };
        if buffer.is_empty() {
            return Vec::new();
        }
        let entry_count = max_batch_items.min(self.flush_policy.flushable_entry_count(buffer));
        buffer.extract_entries(entry_count)
    }
}

//! Flush decision policy.

use super::buffer::RequestBatchBuffer;

/// Decides when a buffer is due for a flush and how many entries a flush
/// should take. Stateless; every decision is recomputed against the
/// buffer's current counters.
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    max_batch_items: usize,
    /// 0 disables byte-based flushing.
    max_batch_bytes_size: usize,
}

impl FlushPolicy {
    pub fn new(max_batch_items: usize, max_batch_bytes_size: usize) -> Self {
        Self {
            max_batch_items,
            max_batch_bytes_size,
        }
    }

    /// True when the buffer holds a full batch, by entry count or by
    /// cumulative payload bytes.
    pub fn should_flush<Q, R>(&self, buffer: &RequestBatchBuffer<Q, R>) -> bool {
        buffer.size() >= self.max_batch_items
            || (self.max_batch_bytes_size > 0
                && buffer.current_batch_size_bytes() > self.max_batch_bytes_size)
    }

    /// True when adding a request of the given estimated size would push the
    /// buffer past the byte limit.
    ///
    /// The buffer is flushed first and the incoming request starts a fresh
    /// batch, so an oversized arrival is never merged into an
    /// already-near-limit batch.
    pub fn should_flush_before_add<Q, R>(
        &self,
        buffer: &RequestBatchBuffer<Q, R>,
        incoming_bytes: Option<usize>,
    ) -> bool {
        if self.max_batch_bytes_size == 0 || buffer.is_empty() {
            return false;
        }
        buffer.current_batch_size_bytes() + incoming_bytes.unwrap_or(0) > self.max_batch_bytes_size
    }

    /// Number of entries a due flush should take: everything present, capped
    /// at the per-call item ceiling.
    pub fn flushable_entry_count<Q, R>(&self, buffer: &RequestBatchBuffer<Q, R>) -> usize {
        buffer.size().min(self.max_batch_items)
    }
}

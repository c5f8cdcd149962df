//! Batch key to buffer mapping.

use super::buffer::{BatchEntry, RejectedEntry, RequestBatchBuffer};
use super::extractor::BatchRequestExtractor;
use super::policy::FlushPolicy;
use crate::config::BatchManagerConfig;
use crate::error::Error;
use crate::scheduler::ScheduledFlushHandle;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Maps each batch key to its [`RequestBatchBuffer`], enforcing the
/// distinct-key ceiling.
///
/// Lookups take a shared read lock; buffer creation re-checks under the
/// write lock so exactly one buffer is ever installed per key, even when
/// many submitters race on a new key. Buffer `Arc`s are cloned out of the
/// guard, so no entry-level work runs while the table is locked.
pub struct BatchingMap<Q, R> {
    max_batch_keys: usize,
    max_buffer_size: usize,
    buffers_by_key: RwLock<HashMap<String, Arc<RequestBatchBuffer<Q, R>>>>,
    request_extractor: BatchRequestExtractor,
}

impl<Q, R> BatchingMap<Q, R> {
    pub fn new(config: &BatchManagerConfig) -> Self {
        let flush_policy = FlushPolicy::new(config.max_batch_items, config.max_batch_bytes_size);
        Self {
            max_batch_keys: config.max_batch_keys,
            max_buffer_size: config.max_buffer_size,
            buffers_by_key: RwLock::new(HashMap::new()),
            request_extractor: BatchRequestExtractor::new(flush_policy),
        }
    }

    fn buffers(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RequestBatchBuffer<Q, R>>>> {
        // No code path panics while holding the lock, so a poisoned guard
        // still protects consistent state.
        self.buffers_by_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn buffers_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RequestBatchBuffer<Q, R>>>> {
        self.buffers_by_key
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn buffer(&self, batch_key: &str) -> Option<Arc<RequestBatchBuffer<Q, R>>> {
        self.buffers().get(batch_key).cloned()
    }

    /// Adds an entry to the buffer for `batch_key`, creating the buffer
    /// (and, through `schedule_flush`, its timer) on first use of the key.
    ///
    /// `schedule_flush` runs only when a buffer is actually created, so keys
    /// that never receive traffic never get a timer.
    pub fn add_request(
        &self,
        batch_key: &str,
        schedule_flush: impl FnOnce() -> Box<dyn ScheduledFlushHandle>,
        entry: BatchEntry<Q, R>,
    ) -> Result<(), RejectedEntry<Q, R>> {
        let buffer = match self.buffer(batch_key) {
            Some(buffer) => buffer,
            None => {
                let mut buffers = self.buffers_mut();
                // Re-check: a concurrent submitter may have installed the
                // buffer between the read and this write lock.
                match buffers.get(batch_key) {
                    Some(buffer) => Arc::clone(buffer),
                    None => {
                        if buffers.len() >= self.max_batch_keys {
                            return Err(RejectedEntry::new(
                                Error::TooManyBatchKeys {
                                    max_batch_keys: self.max_batch_keys,
                                },
                                entry,
                            ));
                        }
                        let buffer = Arc::new(RequestBatchBuffer::new(
                            schedule_flush(),
                            self.max_buffer_size,
                        ));
                        buffers.insert(batch_key.to_string(), Arc::clone(&buffer));
                        buffer
                    }
                }
            }
        };
        buffer.put(entry)
    }

    pub fn contains_key(&self, batch_key: &str) -> bool {
        self.buffers().contains_key(batch_key)
    }

    /// Entries due for a reactive (post-insert) flush; empty when the
    /// partition does not exist or nothing is due.
    pub fn get_requests_to_flush(&self, batch_key: &str) -> Vec<(String, BatchEntry<Q, R>)> {
        self.request_extractor
            .extract_flushable_requests(self.buffer(batch_key).as_deref())
    }

    /// Entries due for a pre-insert flush given the incoming request's
    /// estimated size.
    pub fn get_requests_to_flush_before_add(
        &self,
        batch_key: &str,
        incoming_bytes: Option<usize>,
    ) -> Vec<(String, BatchEntry<Q, R>)> {
        self.request_extractor
            .extract_flushable_requests_before_add(self.buffer(batch_key).as_deref(), incoming_bytes)
    }

    /// Entries due for a scheduled flush, capped at `max_batch_items`.
    pub fn get_scheduled_requests_to_flush(
        &self,
        batch_key: &str,
        max_batch_items: usize,
    ) -> Vec<(String, BatchEntry<Q, R>)> {
        self.request_extractor.extract_scheduled_flushable_requests(
            self.buffer(batch_key).as_deref(),
            max_batch_items,
        )
    }

    /// Replaces the named buffer's scheduled flush token; no-op when the
    /// partition was cleared concurrently.
    pub fn update_scheduled_flush(
        &self,
        batch_key: &str,
        scheduled_flush: Box<dyn ScheduledFlushHandle>,
    ) {
        if let Some(buffer) = self.buffer(batch_key) {
            buffer.put_scheduled_flush(scheduled_flush);
        }
    }

    /// Cancels the named buffer's scheduled flush token; no-op when the
    /// partition was cleared concurrently.
    pub fn cancel_scheduled_flush(&self, batch_key: &str) {
        if let Some(buffer) = self.buffer(batch_key) {
            buffer.cancel_scheduled_flush();
        }
    }

    /// Snapshot of the current batch keys, for shutdown iteration.
    pub fn keys(&self) -> Vec<String> {
        self.buffers().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers().is_empty()
    }

    /// Total number of pending entries across all partitions.
    pub fn buffered_request_count(&self) -> usize {
        self.buffers().values().map(|buffer| buffer.size()).sum()
    }

    /// Clears every buffer and drops all partitions. Pending entries are
    /// dropped uncompleted, surfacing cancellation on their handles.
    pub fn clear(&self) {
        let mut buffers = self.buffers_mut();
        for buffer in buffers.values() {
            buffer.clear();
        }
        buffers.clear();
    }
}

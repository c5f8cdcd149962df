//! Per-partition request buffer.

use crate::error::Error;
use crate::response::ResponseCompleter;
use crate::scheduler::ScheduledFlushHandle;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One buffered request together with its completion side and the payload
/// size estimate cached at submission time.
#[derive(Debug)]
pub struct BatchEntry<Q, R> {
    request: Q,
    completer: ResponseCompleter<R>,
    payload_bytes: Option<usize>,
}

impl<Q, R> BatchEntry<Q, R> {
    pub fn new(request: Q, completer: ResponseCompleter<R>, payload_bytes: Option<usize>) -> Self {
        Self {
            request,
            completer,
            payload_bytes,
        }
    }

    pub fn request(&self) -> &Q {
        &self.request
    }

    pub fn payload_bytes(&self) -> Option<usize> {
        self.payload_bytes
    }

    /// Splits the entry for dispatch: the request goes downstream, the
    /// completer into the demultiplexing map.
    pub fn into_parts(self) -> (Q, ResponseCompleter<R>) {
        (self.request, self.completer)
    }

    /// Completes the entry's handle without dispatching it.
    pub fn complete(self, result: crate::Result<R>) {
        self.completer.complete(result);
    }
}

/// A rejected `put`, handing the entry back to the caller so its handle can
/// be completed exceptionally, in the manner of
/// [`std::sync::mpsc::TrySendError`].
#[derive(Debug)]
pub struct RejectedEntry<Q, R> {
    error: Error,
    entry: BatchEntry<Q, R>,
}

impl<Q, R> RejectedEntry<Q, R> {
    pub fn new(error: Error, entry: BatchEntry<Q, R>) -> Self {
        Self { error, entry }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_parts(self) -> (Error, BatchEntry<Q, R>) {
        (self.error, self.entry)
    }
}

/// Stores and manages pending requests for a single batch key.
///
/// Entries receive a per-partition sequence id assigned in strictly
/// increasing order, wrapping back to 0 at the representable maximum.
/// Extraction walks an independent read cursor so entries leave in exactly
/// the order they arrived, regardless of how many flush triggers race.
pub struct RequestBatchBuffer<Q, R> {
    max_buffer_size: usize,
    state: Mutex<BufferState<Q, R>>,
}

struct BufferState<Q, R> {
    entries: HashMap<u32, BatchEntry<Q, R>>,
    /// Next sequence id to assign.
    next_id: u32,
    /// Next sequence id to extract. Trails `next_id`; ids below it have
    /// already been extracted and cannot reappear before the cursor wraps
    /// the whole id space.
    next_batch_entry: u32,
    scheduled_flush: Box<dyn ScheduledFlushHandle>,
}

impl<Q, R> BufferState<Q, R> {
    fn assign_id(&mut self) -> u32 {
        if self.next_id == u32::MAX {
            self.next_id = 0;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl<Q, R> RequestBatchBuffer<Q, R> {
    /// Creates an empty buffer owning its scheduled flush token.
    pub fn new(scheduled_flush: Box<dyn ScheduledFlushHandle>, max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size,
            state: Mutex::new(BufferState {
                entries: HashMap::new(),
                next_id: 0,
                next_batch_entry: 0,
                scheduled_flush,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BufferState<Q, R>> {
        // No code path panics while holding the lock, so a poisoned guard
        // still protects consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an entry, assigning it the next sequence id.
    ///
    /// Rejects with [`Error::BufferFull`] when the buffer already holds
    /// `max_buffer_size` entries, returning the entry untouched.
    pub fn put(&self, entry: BatchEntry<Q, R>) -> Result<(), RejectedEntry<Q, R>> {
        let mut state = self.state();
        if state.entries.len() == self.max_buffer_size {
            return Err(RejectedEntry::new(
                Error::BufferFull {
                    max_buffer_size: self.max_buffer_size,
                },
                entry,
            ));
        }
        let id = state.assign_id();
        debug_assert!(
            !state.entries.contains_key(&id),
            "sequence id wrapped onto a resident entry"
        );
        state.entries.insert(id, entry);
        Ok(())
    }

    /// Removes and returns up to `max_entries` entries in insertion order,
    /// with their string-encoded sequence ids.
    ///
    /// Walks the read cursor over contiguous present ids and stops early
    /// when the next expected id is absent, so a flush can neither skip nor
    /// duplicate an entry.
    pub fn extract_entries(&self, max_entries: usize) -> Vec<(String, BatchEntry<Q, R>)> {
        let mut state = self.state();
        let mut extracted = Vec::new();
        while extracted.len() < max_entries {
            if state.next_batch_entry == u32::MAX {
                state.next_batch_entry = 0;
            }
            let id = state.next_batch_entry;
            match state.entries.remove(&id) {
                Some(entry) => {
                    extracted.push((id.to_string(), entry));
                    state.next_batch_entry = id + 1;
                }
                None => break,
            }
        }
        extracted
    }

    pub fn size(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Cumulative cached payload estimate of all pending entries; entries
    /// without an estimate count as zero.
    pub fn current_batch_size_bytes(&self) -> usize {
        self.state()
            .entries
            .values()
            .map(|entry| entry.payload_bytes().unwrap_or(0))
            .sum()
    }

    /// Snapshot of the pending sequence ids, in id order.
    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.state();
        let mut ids: Vec<u32> = state.entries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|id| id.to_string()).collect()
    }

    /// Replaces the owned scheduled flush token. The previous token is
    /// dropped without being cancelled here; callers cancel first when they
    /// mean to stop it.
    pub fn put_scheduled_flush(&self, scheduled_flush: Box<dyn ScheduledFlushHandle>) {
        self.state().scheduled_flush = scheduled_flush;
    }

    /// Cancels the owned scheduled flush token (non-interrupting).
    pub fn cancel_scheduled_flush(&self) {
        self.state().scheduled_flush.cancel();
    }

    /// Drops all entries without completing them. Dropping an entry's
    /// completer surfaces a cancellation on its handle; callers wanting any
    /// other completion must extract first.
    pub fn clear(&self) {
        self.state().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{response_channel, ResponseHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NoopFlush;

    impl ScheduledFlushHandle for NoopFlush {
        fn cancel(&self) {}
    }

    struct CountingFlush {
        cancels: Arc<AtomicUsize>,
    }

    impl ScheduledFlushHandle for CountingFlush {
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn buffer(max_buffer_size: usize) -> RequestBatchBuffer<String, String> {
        RequestBatchBuffer::new(Box::new(NoopFlush), max_buffer_size)
    }

    fn put_request(
        buffer: &RequestBatchBuffer<String, String>,
        request: &str,
        payload_bytes: Option<usize>,
    ) {
        let (completer, _handle) = response_channel();
        buffer
            .put(BatchEntry::new(request.to_string(), completer, payload_bytes))
            .expect("buffer should accept the entry");
    }

    #[test]
    fn test_put_stores_entry() {
        let buffer = buffer(10);
        put_request(&buffer, "request1", None);
        assert_eq!(buffer.size(), 1);
        assert!(!buffer.is_empty());
        assert_eq!(buffer.pending_ids(), vec!["0".to_string()]);
    }

    #[test]
    fn test_put_rejects_when_full() {
        let buffer = buffer(10);
        for i in 0..10 {
            put_request(&buffer, &format!("request{i}"), None);
        }

        let (completer, _handle) = response_channel();
        let rejected = buffer
            .put(BatchEntry::new("request11".to_string(), completer, None))
            .unwrap_err();
        assert!(matches!(
            rejected.error(),
            Error::BufferFull {
                max_buffer_size: 10
            }
        ));

        // Earlier entries are unaffected.
        assert_eq!(buffer.size(), 10);
        let extracted = buffer.extract_entries(10);
        assert_eq!(extracted.len(), 10);
        assert_eq!(extracted[0].0, "0");
    }

    #[test]
    fn test_extract_returns_entries_in_insertion_order() {
        let buffer = buffer(100);
        for i in 0..5 {
            put_request(&buffer, &format!("request{i}"), None);
        }

        let first = buffer.extract_entries(2);
        let ids: Vec<&str> = first.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
        assert_eq!(first[0].1.request(), "request0");

        // Extracted ids never reappear.
        let rest = buffer.extract_entries(10);
        let ids: Vec<&str> = rest.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
        assert!(buffer.is_empty());

        // New entries continue the id sequence.
        put_request(&buffer, "request5", None);
        let next = buffer.extract_entries(1);
        assert_eq!(next[0].0, "5");
    }

    #[test]
    fn test_extract_respects_cap() {
        let buffer = buffer(100);
        for i in 0..5 {
            put_request(&buffer, &format!("request{i}"), None);
        }
        assert_eq!(buffer.extract_entries(3).len(), 3);
        assert_eq!(buffer.size(), 2);
        assert!(buffer.extract_entries(0).is_empty());
    }

    #[test]
    fn test_byte_accounting_sums_cached_estimates() {
        let buffer = buffer(100);
        put_request(&buffer, "a", Some(1_000));
        put_request(&buffer, "b", Some(250));
        put_request(&buffer, "c", None);
        assert_eq!(buffer.current_batch_size_bytes(), 1_250);
    }

    #[test]
    fn test_clear_cancels_pending_handles() {
        let buffer = buffer(10);
        let (completer, handle): (_, ResponseHandle<String>) = response_channel();
        buffer
            .put(BatchEntry::new("request1".to_string(), completer, None))
            .unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(matches!(
            tokio_test::block_on(handle),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_cancel_scheduled_flush_hits_owned_token() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let buffer: RequestBatchBuffer<String, String> = RequestBatchBuffer::new(
            Box::new(CountingFlush {
                cancels: Arc::clone(&cancels),
            }),
            10,
        );
        buffer.cancel_scheduled_flush();
        assert_eq!(cancels.load(Ordering::SeqCst), 1);

        // Replacing the token redirects future cancels to the new one.
        let replacement_cancels = Arc::new(AtomicUsize::new(0));
        buffer.put_scheduled_flush(Box::new(CountingFlush {
            cancels: Arc::clone(&replacement_cancels),
        }));
        buffer.cancel_scheduled_flush();
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(replacement_cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_puts_assign_unique_ids() {
        let buffer: Arc<RequestBatchBuffer<String, String>> = Arc::new(buffer(1_000));
        let mut workers = Vec::new();
        for worker in 0..8 {
            let buffer = Arc::clone(&buffer);
            workers.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let (completer, _handle) = response_channel();
                    buffer
                        .put(BatchEntry::new(
                            format!("w{worker}-{i}"),
                            completer,
                            None,
                        ))
                        .expect("capacity is sufficient");
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(buffer.size(), 800);
        let extracted = buffer.extract_entries(800);
        assert_eq!(extracted.len(), 800);
        let ids: Vec<u32> = extracted
            .iter()
            .map(|(id, _)| id.parse().unwrap())
            .collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

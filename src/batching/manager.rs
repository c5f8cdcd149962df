//! Request batch manager.

use super::buffer::BatchEntry;
use super::map::BatchingMap;
use crate::backend::{BatchBackend, BatchItemOutcome, IdentifiedRequest};
use crate::config::BatchManagerConfig;
use crate::error::{Error, Result};
use crate::response::{response_channel, ResponseCompleter, ResponseHandle};
use crate::scheduler::{FlushScheduler, ScheduledFlushHandle, TokioFlushScheduler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Public entry point of the batching engine.
///
/// Accepts requests one at a time from any thread, groups them by the
/// backend's batch key, and coalesces each group into downstream batch
/// calls triggered by three racing conditions: a full batch (by count or by
/// bytes), an incoming request that would cross the byte limit, and a
/// per-partition fixed-rate timer. Results are demultiplexed back onto the
/// per-request [`ResponseHandle`]s.
///
/// Dropping the manager closes it.
pub struct RequestBatchManager<B: BatchBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: BatchBackend> RequestBatchManager<B> {
    /// Starts building a manager around a backend.
    pub fn builder(backend: B) -> RequestBatchManagerBuilder<B> {
        RequestBatchManagerBuilder::new(backend)
    }

    /// Submits one request for batched delivery.
    ///
    /// Never blocks on I/O and never fails synchronously: capacity
    /// rejections, downstream failures, and shutdown all surface on the
    /// returned handle.
    pub fn submit(&self, request: B::Request) -> ResponseHandle<B::Response> {
        let (completer, handle) = response_channel();
        if self.inner.closed.load(Ordering::SeqCst) {
            completer.complete(Err(Error::runtime("batch manager is closed")));
            return handle;
        }
        self.inner.submit_request(request, completer);
        handle
    }

    /// Drains and shuts down the engine.
    ///
    /// Cancels every partition timer, flushes buffered residue downstream,
    /// aborts still-pending batch calls (their callers observe
    /// [`Error::Cancelled`]), and drops all partitions. Idempotent: a second
    /// call completes nothing further and returns immediately.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Point-in-time counters for diagnostics.
    pub fn snapshot(&self) -> BatchManagerSnapshot {
        self.inner.snapshot()
    }
}

impl<B: BatchBackend> Drop for RequestBatchManager<B> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<B: BatchBackend> std::fmt::Debug for RequestBatchManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RequestBatchManager")
            .field("batch_keys", &snapshot.batch_keys)
            .field("buffered_requests", &snapshot.buffered_requests)
            .field("pending_batches", &snapshot.pending_batches)
            .finish()
    }
}

/// Point-in-time counters of a [`RequestBatchManager`].
#[derive(Debug, Clone)]
pub struct BatchManagerSnapshot {
    /// Distinct batch keys with a live buffer.
    pub batch_keys: usize,
    /// Pending entries across all buffers.
    pub buffered_requests: usize,
    /// Downstream batch calls currently in flight.
    pub pending_batches: usize,
}

/// Builder for [`RequestBatchManager`].
pub struct RequestBatchManagerBuilder<B: BatchBackend> {
    backend: B,
    config: BatchManagerConfig,
    scheduler: Option<Box<dyn FlushScheduler>>,
    runtime: Option<Handle>,
}

impl<B: BatchBackend> RequestBatchManagerBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: BatchManagerConfig::default(),
            scheduler: None,
            runtime: None,
        }
    }

    pub fn with_config(mut self, config: BatchManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the scheduling capability; defaults to
    /// [`TokioFlushScheduler`] on the manager's runtime.
    pub fn with_scheduler(mut self, scheduler: Box<dyn FlushScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Supplies an explicit runtime handle; defaults to the ambient runtime
    /// of the thread calling [`build`](Self::build).
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validates the configuration and assembles the manager.
    pub fn build(self) -> Result<RequestBatchManager<B>> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                Error::runtime(
                    "RequestBatchManager requires a Tokio runtime; build inside one or supply a handle",
                )
            })?,
        };
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Box::new(TokioFlushScheduler::with_handle(runtime.clone())));
        let config = self.config;
        let batching_map = BatchingMap::new(&config);

        let inner = Arc::new_cyclic(|weak_self| Inner {
            weak_self: weak_self.clone(),
            config,
            backend: self.backend,
            scheduler,
            runtime,
            batching_map,
            pending_batches: Mutex::new(HashMap::new()),
            next_batch_task: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        Ok(RequestBatchManager { inner })
    }
}

struct Inner<B: BatchBackend> {
    /// Self-reference handed to timer callbacks and batch tasks. Timers hold
    /// only the weak side so an abandoned manager can drop.
    weak_self: Weak<Inner<B>>,
    config: BatchManagerConfig,
    backend: B,
    scheduler: Box<dyn FlushScheduler>,
    runtime: Handle,
    batching_map: BatchingMap<B::Request, B::Response>,
    /// In-flight downstream batch tasks, for best-effort cancellation at
    /// shutdown. Each task removes its own entry on completion.
    pending_batches: Mutex<HashMap<u64, AbortHandle>>,
    next_batch_task: AtomicU64,
    closed: AtomicBool,
}

impl<B: BatchBackend> Inner<B> {
    fn pending_batches(&self) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
        // No code path panics while holding the lock, so a poisoned guard
        // still protects consistent state.
        self.pending_batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn submit_request(&self, request: B::Request, completer: ResponseCompleter<B::Response>) {
        let batch_key = self.backend.batch_key(&request);
        let byte_flushing = self.config.byte_flushing_enabled();
        let payload_bytes = if byte_flushing {
            self.backend.estimate_payload_size(&request)
        } else {
            None
        };

        // Flush existing entries first when this request would push the
        // buffer past the byte limit; the request then starts a fresh batch.
        if byte_flushing && self.batching_map.contains_key(&batch_key) {
            let requests_to_flush = self
                .batching_map
                .get_requests_to_flush_before_add(&batch_key, payload_bytes);
            if !requests_to_flush.is_empty() {
                debug!(
                    batch_key = %batch_key,
                    count = requests_to_flush.len(),
                    "flushing buffer ahead of a byte-limit overflow"
                );
                self.manual_flush_buffer(&batch_key, requests_to_flush);
            }
        }

        let entry = BatchEntry::new(request, completer, payload_bytes);
        let add_result = self.batching_map.add_request(
            &batch_key,
            || self.schedule_buffer_flush(batch_key.clone()),
            entry,
        );
        if let Err(rejected) = add_result {
            let (error, entry) = rejected.into_parts();
            debug!(batch_key = %batch_key, %error, "rejecting request");
            entry.complete(Err(error));
            return;
        }

        // Flush immediately if this request completed a batch.
        let requests_to_flush = self.batching_map.get_requests_to_flush(&batch_key);
        if !requests_to_flush.is_empty() {
            self.manual_flush_buffer(&batch_key, requests_to_flush);
        }
    }

    /// Size- or byte-triggered flush: the timer is re-anchored to this
    /// flush by cancelling the old token and scheduling a fresh one.
    fn manual_flush_buffer(
        &self,
        batch_key: &str,
        requests_to_flush: Vec<(String, BatchEntry<B::Request, B::Response>)>,
    ) {
        self.batching_map.cancel_scheduled_flush(batch_key);
        self.flush_buffer(batch_key, requests_to_flush);
        self.batching_map
            .update_scheduled_flush(batch_key, self.schedule_buffer_flush(batch_key.to_string()));
    }

    fn schedule_buffer_flush(&self, batch_key: String) -> Box<dyn ScheduledFlushHandle> {
        let weak = self.weak_self.clone();
        self.scheduler.schedule_repeating(
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.perform_scheduled_flush(&batch_key);
                }
            }),
            self.config.send_request_frequency,
        )
    }

    fn perform_scheduled_flush(&self, batch_key: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let requests_to_flush = self
            .batching_map
            .get_scheduled_requests_to_flush(batch_key, self.config.max_batch_items);
        if !requests_to_flush.is_empty() {
            debug!(
                batch_key = %batch_key,
                count = requests_to_flush.len(),
                "scheduled flush"
            );
            self.flush_buffer(batch_key, requests_to_flush);
        }
    }

    /// Dispatches the extracted entries as one downstream batch call and
    /// arranges demultiplexing of its result.
    fn flush_buffer(
        &self,
        batch_key: &str,
        requests_to_flush: Vec<(String, BatchEntry<B::Request, B::Response>)>,
    ) {
        if requests_to_flush.is_empty() {
            return;
        }
        let mut request_entries = Vec::with_capacity(requests_to_flush.len());
        let mut completers = HashMap::with_capacity(requests_to_flush.len());
        for (id, entry) in requests_to_flush {
            let (request, completer) = entry.into_parts();
            request_entries.push(IdentifiedRequest::new(id.clone(), request));
            completers.insert(id, completer);
        }

        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        let task_id = self.next_batch_task.fetch_add(1, Ordering::Relaxed);
        let batch_key = batch_key.to_string();
        debug!(
            batch_key = %batch_key,
            entries = request_entries.len(),
            "dispatching batch"
        );

        // Register the abort handle before the task can observe the pending
        // set, so the task's self-removal cannot race ahead of registration.
        let mut pending = self.pending_batches();
        let task = self.runtime.spawn(async move {
            let result = inner.backend.send_batch(request_entries, &batch_key).await;
            inner.complete_responses(result, completers);
            inner.pending_batches().remove(&task_id);
        });
        pending.insert(task_id, task.abort_handle());
    }

    /// Routes a finished batch back onto the handles of exactly the flushed
    /// entries. A whole-batch failure fails every handle; a successful
    /// response is split into per-entry outcomes, each completing its handle
    /// exactly once.
    fn complete_responses(
        &self,
        result: Result<B::BatchResponse>,
        mut completers: HashMap<String, ResponseCompleter<B::Response>>,
    ) {
        match result {
            Err(error) => {
                warn!(%error, "batch send failed; failing every request in the batch");
                for (_, completer) in completers.drain() {
                    completer.complete(Err(error.clone()));
                }
            }
            Ok(batch_response) => {
                for outcome in self.backend.map_batch_response(batch_response) {
                    let Some(completer) = completers.remove(outcome.id()) else {
                        warn!(id = %outcome.id(), "batch response names an entry id outside this flush");
                        continue;
                    };
                    match outcome {
                        BatchItemOutcome::Success { response, .. } => {
                            completer.complete(Ok(response));
                        }
                        BatchItemOutcome::Failure { error, .. } => {
                            completer.complete(Err(error));
                        }
                    }
                }
                if !completers.is_empty() {
                    warn!(
                        unanswered = completers.len(),
                        "batch response left entries unanswered; their callers observe cancellation"
                    );
                }
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing batch manager");
        for batch_key in self.batching_map.keys() {
            self.batching_map.cancel_scheduled_flush(&batch_key);
            // Drain through the scheduled path: it ignores size and byte
            // thresholds, so residue below every threshold still goes out.
            loop {
                let requests_to_flush = self
                    .batching_map
                    .get_scheduled_requests_to_flush(&batch_key, self.config.max_batch_items);
                if requests_to_flush.is_empty() {
                    break;
                }
                self.flush_buffer(&batch_key, requests_to_flush);
            }
        }
        let pending: Vec<AbortHandle> = self
            .pending_batches()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in pending {
            handle.abort();
        }
        self.batching_map.clear();
    }

    fn snapshot(&self) -> BatchManagerSnapshot {
        BatchManagerSnapshot {
            batch_keys: self.batching_map.len(),
            buffered_requests: self.batching_map.buffered_request_count(),
            pending_batches: self.pending_batches().len(),
        }
    }
}

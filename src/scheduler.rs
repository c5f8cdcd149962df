//! Scheduled flush capability.
//!
//! The engine never owns a thread pool. It consumes an injected
//! [`FlushScheduler`] that can arrange a repeating callback and hand back a
//! cancellable token. [`TokioFlushScheduler`] is the default implementation,
//! driving callbacks from a fixed-rate [`tokio::time`] interval task.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// The repeating callback driven by a scheduler.
pub type FlushCallback = Box<dyn Fn() + Send + Sync>;

/// Cancellable token for one scheduled repeating flush.
pub trait ScheduledFlushHandle: Send + Sync {
    /// Stops future invocations.
    ///
    /// Cancellation is non-interrupting: a callback invocation already in
    /// progress runs to completion. Cancelling twice is a no-op.
    fn cancel(&self);
}

/// Capability to arrange fixed-rate repeating callbacks.
pub trait FlushScheduler: Send + Sync {
    /// Schedules `callback` to run every `period`, first firing one full
    /// period from now. Returns the token that stops it.
    fn schedule_repeating(
        &self,
        callback: FlushCallback,
        period: Duration,
    ) -> Box<dyn ScheduledFlushHandle>;
}

/// Default scheduler backed by a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioFlushScheduler {
    runtime: Handle,
}

impl TokioFlushScheduler {
    /// Captures the ambient runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::runtime("TokioFlushScheduler requires a running Tokio runtime")
        })?;
        Ok(Self { runtime })
    }

    /// Uses an explicit runtime handle, for callers scheduling from threads
    /// outside the runtime.
    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl FlushScheduler for TokioFlushScheduler {
    fn schedule_repeating(
        &self,
        callback: FlushCallback,
        period: Duration,
    ) -> Box<dyn ScheduledFlushHandle> {
        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        Box::new(TokioScheduledFlush {
            task: task.abort_handle(),
        })
    }
}

/// Token for a Tokio-scheduled flush; aborts the interval task on cancel and
/// on drop. The callback itself is synchronous, so an abort only takes
/// effect at the next tick await.
struct TokioScheduledFlush {
    task: AbortHandle,
}

impl ScheduledFlushHandle for TokioScheduledFlush {
    fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TokioScheduledFlush {
    fn drop(&mut self) {
        self.task.abort();
    }
}

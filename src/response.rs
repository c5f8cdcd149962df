//! Write-once response handles returned to callers of
//! [`submit`](crate::RequestBatchManager::submit).
//!
//! Every submitted request is paired with exactly one [`ResponseHandle`] and
//! one [`ResponseCompleter`]. The handle is the caller-facing future; the
//! completer travels with the buffered request and is consumed exactly once
//! when the batch containing the request is demultiplexed. Dropping a
//! completer without completing it surfaces [`Error::Cancelled`] on the
//! handle, which is how shutdown cancellation reaches callers.

use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Creates a connected completer/handle pair for one request.
pub fn response_channel<R>() -> (ResponseCompleter<R>, ResponseHandle<R>) {
    let (tx, rx) = oneshot::channel();
    (ResponseCompleter { tx }, ResponseHandle { rx })
}

/// The write-once completion side of a response.
pub struct ResponseCompleter<R> {
    tx: oneshot::Sender<Result<R>>,
}

impl<R> std::fmt::Debug for ResponseCompleter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCompleter").finish_non_exhaustive()
    }
}

impl<R> ResponseCompleter<R> {
    /// Completes the paired handle with a response or a failure.
    ///
    /// A caller that dropped its handle no longer observes the outcome; the
    /// completion is discarded in that case.
    pub fn complete(self, result: Result<R>) {
        let _ = self.tx.send(result);
    }
}

/// The caller-facing future for one submitted request.
///
/// Resolves to the per-request response, the per-request failure, or
/// [`Error::Cancelled`] when the engine shut down before a response arrived.
pub struct ResponseHandle<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> std::fmt::Debug for ResponseHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle").finish_non_exhaustive()
    }
}

impl<R> ResponseHandle<R> {
    /// Blocks the current (non-runtime) thread until the response arrives.
    ///
    /// Panics if called from within an async context; use `.await` there.
    pub fn blocking_wait(self) -> Result<R> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }
}

impl<R> Future for ResponseHandle<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_delivers_response() {
        let (completer, handle) = response_channel();
        completer.complete(Ok("done".to_string()));
        assert_eq!(tokio_test::block_on(handle).unwrap(), "done");
    }

    #[test]
    fn test_complete_delivers_failure() {
        let (completer, handle) = response_channel::<String>();
        completer.complete(Err(Error::downstream("boom")));
        let err = tokio_test::block_on(handle).unwrap_err();
        assert!(matches!(err, Error::Downstream { .. }));
    }

    #[test]
    fn test_dropped_completer_cancels_handle() {
        let (completer, handle) = response_channel::<String>();
        drop(completer);
        let err = tokio_test::block_on(handle).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_dropped_handle_discards_completion() {
        let (completer, handle) = response_channel();
        drop(handle);
        // Must not panic.
        completer.complete(Ok(42));
    }

    #[test]
    fn test_blocking_wait() {
        let (completer, handle) = response_channel();
        std::thread::spawn(move || completer.complete(Ok(7)));
        assert_eq!(handle.blocking_wait().unwrap(), 7);
    }
}

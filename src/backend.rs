//! Downstream collaborator contract.
//!
//! The engine never talks to a network itself. Everything wire-facing is
//! delegated to a [`BatchBackend`]: computing the batch key that groups
//! requests, estimating a request's payload size for byte-threshold
//! flushing, performing the actual batch call, and translating the batch
//! response back into per-entry outcomes.

use crate::error::{Error, Result};
use async_trait::async_trait;

/// The downstream side of the batching engine.
///
/// Implementations must be cheap to call for [`batch_key`] and
/// [`estimate_payload_size`]; both run synchronously on the submitting
/// thread. Only [`send_batch`] may perform I/O.
///
/// [`batch_key`]: BatchBackend::batch_key
/// [`estimate_payload_size`]: BatchBackend::estimate_payload_size
/// [`send_batch`]: BatchBackend::send_batch
#[async_trait]
pub trait BatchBackend: Send + Sync + 'static {
    /// The per-item request type accepted by `submit`.
    type Request: Send + 'static;
    /// The per-item response type resolved on each response handle.
    type Response: Send + 'static;
    /// The raw response of one downstream batch call.
    type BatchResponse: Send + 'static;

    /// Computes the partition key for a request.
    ///
    /// Must be pure and deterministic; requests sharing a key may be
    /// coalesced into one downstream call.
    fn batch_key(&self, request: &Self::Request) -> String;

    /// Estimates the on-wire payload size of a request in bytes.
    ///
    /// Consulted once per submission, and only when byte-threshold flushing
    /// is enabled. `None` means the request contributes nothing to byte
    /// accounting.
    fn estimate_payload_size(&self, _request: &Self::Request) -> Option<usize> {
        None
    }

    /// Performs one downstream batch call for the given entries.
    ///
    /// The entries arrive in submission order. The returned response must be
    /// convertible by [`map_batch_response`](BatchBackend::map_batch_response)
    /// into outcomes covering exactly the submitted entry ids.
    async fn send_batch(
        &self,
        requests: Vec<IdentifiedRequest<Self::Request>>,
        batch_key: &str,
    ) -> Result<Self::BatchResponse>;

    /// Splits a batch response into per-entry successes and failures.
    fn map_batch_response(
        &self,
        response: Self::BatchResponse,
    ) -> Vec<BatchItemOutcome<Self::Response>>;
}

/// One entry of a downstream batch call: the request plus the sequence id
/// used to route its response back to the originating caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifiedRequest<Q> {
    /// String-encoded per-partition sequence id.
    pub id: String,
    /// The submitted request.
    pub request: Q,
}

impl<Q> IdentifiedRequest<Q> {
    pub fn new(id: impl Into<String>, request: Q) -> Self {
        Self {
            id: id.into(),
            request,
        }
    }
}

/// Per-entry result of a batch call.
///
/// A batch response may mix successes and failures; each outcome is routed
/// independently to the response handle registered under its id.
#[derive(Debug)]
pub enum BatchItemOutcome<R> {
    Success { id: String, response: R },
    Failure { id: String, error: Error },
}

impl<R> BatchItemOutcome<R> {
    pub fn success(id: impl Into<String>, response: R) -> Self {
        BatchItemOutcome::Success {
            id: id.into(),
            response,
        }
    }

    pub fn failure(id: impl Into<String>, error: Error) -> Self {
        BatchItemOutcome::Failure {
            id: id.into(),
            error,
        }
    }

    /// The sequence id this outcome belongs to.
    pub fn id(&self) -> &str {
        match self {
            BatchItemOutcome::Success { id, .. } | BatchItemOutcome::Failure { id, .. } => id,
        }
    }
}

//! # request-batcher
//!
//! 自动请求批处理引擎：将独立提交的请求按键聚合，透明地合并为下游批量调用。
//!
//! Automatic request batching engine - transparently coalesces individually
//! submitted requests into downstream batch calls and routes each result
//! back to its original caller.
//!
//! ## Overview
//!
//! Many backends expose batch endpoints that are far cheaper per item than
//! their single-request equivalents. This crate lets an application keep
//! submitting requests one at a time, from any thread, while the engine
//! groups them by a backend-supplied batch key, holds them in bounded
//! per-partition buffers, and sends each group as one batch call when a
//! flush trigger fires. Every submitted request resolves exactly once on
//! its own [`ResponseHandle`] - with its response, its individual failure,
//! or a cancellation at shutdown.
//!
//! ## Core Guarantees
//!
//! - **Exactly-once completion**: a submitted request is never lost and
//!   never completed twice, under concurrent submission, racing flush
//!   triggers, and shutdown.
//! - **Per-partition FIFO**: within one batch key, requests reach the
//!   backend in submission order. No ordering is implied across keys.
//! - **Bounded resources**: per-partition buffer size and the number of
//!   distinct partitions are both capped; overflow is reported on the
//!   offending request's handle, never by tearing anything else down.
//!
//! ## Key Components
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batching`] | The engine: manager, key map, buffers, flush policy |
//! | [`backend`] | The downstream collaborator contract |
//! | [`config`] | Limits and timing, builder-style |
//! | [`response`] | Write-once per-request response handles |
//! | [`scheduler`] | Injected repeating-flush capability |
//! | [`error`] | Unified error type |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use request_batcher::{
//!     BatchBackend, BatchItemOutcome, BatchManagerConfig, IdentifiedRequest,
//!     RequestBatchManager, Result,
//! };
//!
//! struct UppercaseBackend;
//!
//! #[async_trait]
//! impl BatchBackend for UppercaseBackend {
//!     type Request = String;
//!     type Response = String;
//!     type BatchResponse = Vec<(String, String)>;
//!
//!     fn batch_key(&self, _request: &String) -> String {
//!         "default".to_string()
//!     }
//!
//!     async fn send_batch(
//!         &self,
//!         requests: Vec<IdentifiedRequest<String>>,
//!         _batch_key: &str,
//!     ) -> Result<Self::BatchResponse> {
//!         // One network round-trip for the whole batch.
//!         Ok(requests
//!             .into_iter()
//!             .map(|entry| (entry.id, entry.request.to_uppercase()))
//!             .collect())
//!     }
//!
//!     fn map_batch_response(
//!         &self,
//!         response: Self::BatchResponse,
//!     ) -> Vec<BatchItemOutcome<String>> {
//!         response
//!             .into_iter()
//!             .map(|(id, body)| BatchItemOutcome::success(id, body))
//!             .collect()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = RequestBatchManager::builder(UppercaseBackend)
//!         .with_config(BatchManagerConfig::new().with_max_batch_items(10))
//!         .build()?;
//!
//!     let response = manager.submit("hello".to_string()).await?;
//!     assert_eq!(response, "HELLO");
//!
//!     manager.close();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batching;
pub mod config;
pub mod error;
pub mod response;
pub mod scheduler;

// Re-export main types for convenience
pub use backend::{BatchBackend, BatchItemOutcome, IdentifiedRequest};
pub use batching::{
    BatchManagerSnapshot, BatchingMap, RequestBatchManager, RequestBatchManagerBuilder,
};
pub use config::BatchManagerConfig;
pub use error::{Error, Result};
pub use response::ResponseHandle;
pub use scheduler::{FlushScheduler, ScheduledFlushHandle, TokioFlushScheduler};

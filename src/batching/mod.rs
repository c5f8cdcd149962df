//! 自动请求批处理模块：按批次键聚合单个请求并合并为下游批量调用。
//!
//! # Automatic Request Batching Module
//!
//! This module is the core of the engine: it buffers individually submitted
//! requests per batch key and coalesces each group into a single downstream
//! batch call, routing the batch result back to the original callers.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RequestBatchManager`] | Public entry point: submit, close, snapshot |
//! | [`BatchingMap`] | Batch key → buffer table with a distinct-key ceiling |
//! | [`RequestBatchBuffer`] | Per-partition bounded store with sequence-id cursors |
//! | [`BatchRequestExtractor`] | Turns "a flush is due" into the entries to take |
//! | [`FlushPolicy`] | Pure size/byte flush decisions |
//!
//! ## Flush Triggers
//!
//! Three triggers race against each other and against new arrivals; each
//! extraction walks the same per-partition cursor, so no trigger can skip
//! or duplicate an entry:
//!
//! - **Reactive**: right after an insert, when the buffer holds a full
//!   batch by entry count or cumulative payload bytes.
//! - **Pre-insert**: before an insert that would push the buffer past the
//!   byte limit; the pending entries go out first and the new request
//!   starts a fresh batch.
//! - **Scheduled**: a fixed-rate per-partition timer, so sparse traffic
//!   still has bounded latency.
//!
//! ## Example
//!
//! The lower layers can be driven directly, without a manager:
//!
//! ```rust
//! use request_batcher::batching::{
//!     BatchEntry, BatchRequestExtractor, FlushPolicy, RequestBatchBuffer,
//! };
//! use request_batcher::response::response_channel;
//! use request_batcher::scheduler::ScheduledFlushHandle;
//!
//! struct NoopFlush;
//! impl ScheduledFlushHandle for NoopFlush {
//!     fn cancel(&self) {}
//! }
//!
//! let buffer: RequestBatchBuffer<String, String> =
//!     RequestBatchBuffer::new(Box::new(NoopFlush), 100);
//! let extractor = BatchRequestExtractor::new(FlushPolicy::new(2, 0));
//!
//! let (completer, _handle) = response_channel();
//! buffer
//!     .put(BatchEntry::new("first".to_string(), completer, None))
//!     .unwrap();
//! assert!(extractor.extract_flushable_requests(Some(&buffer)).is_empty());
//!
//! let (completer, _handle) = response_channel();
//! buffer
//!     .put(BatchEntry::new("second".to_string(), completer, None))
//!     .unwrap();
//! let flushed = extractor.extract_flushable_requests(Some(&buffer));
//! assert_eq!(flushed.len(), 2);
//! assert_eq!(flushed[0].0, "0");
//! ```

pub mod buffer;
pub mod extractor;
pub mod map;
pub mod manager;
pub mod policy;

pub use buffer::{BatchEntry, RejectedEntry, RequestBatchBuffer};
pub use extractor::BatchRequestExtractor;
pub use map::BatchingMap;
pub use manager::{BatchManagerSnapshot, RequestBatchManager, RequestBatchManagerBuilder};
pub use policy::FlushPolicy;

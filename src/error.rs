use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the batching engine.
///
/// Every variant is `Clone` so a single downstream failure can be fanned out
/// to every response handle of the flush that produced it.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A partition buffer refused a request because it already holds its
    /// maximum number of pending entries.
    #[error("reached max buffer size of {max_buffer_size}")]
    BufferFull {
        /// The configured per-partition pending-request ceiling.
        max_buffer_size: usize,
    },

    /// The batching map refused to create a buffer for a new batch key.
    #[error("reached max batch keys of {max_batch_keys}")]
    TooManyBatchKeys {
        /// The configured distinct-partition ceiling.
        max_batch_keys: usize,
    },

    /// The downstream batch call failed, either as a whole or for one entry.
    #[error("batch send failed: {message}")]
    Downstream { message: String },

    /// The request was cancelled before a response arrived, typically by
    /// shutdown.
    #[error("request cancelled before a response arrived")]
    Cancelled,

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Environmental failure, such as a missing async runtime.
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

impl Error {
    /// Create a new downstream error
    pub fn downstream(message: impl Into<String>) -> Self {
        Error::Downstream {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a new runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
        }
    }

    /// True for the capacity-bound rejections raised at submission time.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Error::BufferFull { .. } | Error::TooManyBatchKeys { .. }
        )
    }
}

//! Error values returned by the dispatcher.
//!
//! Back pressure is an expected, frequent outcome and is reported as a plain
//! value. Everything else indicates a usage or configuration bug.

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatcherError {
    /// The claim would move the publisher past its limit. Retry later.
    #[error("back pressure: publisher limit reached")]
    BackPressure,

    /// The framed message can never fit into a single partition.
    #[error("frame of {framed_length} bytes exceeds partition size {partition_size}")]
    FrameTooLarge {
        framed_length: usize,
        partition_size: usize,
    },

    /// Operation not permitted in the dispatcher's current mode or state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A write went past the space reserved by a claim.
    #[error("fragment overflow: requested {requested} bytes, {capacity} available")]
    FragmentOverflow { capacity: usize, requested: usize },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    Config { field: String, message: String },
}

impl DispatcherError {
    /// Create illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Create configuration validation error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Back pressure is the only error worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackPressure)
    }
}

pub type Result<T> = std::result::Result<T, DispatcherError>;

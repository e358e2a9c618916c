//! Store Error Types
//!
//! Two layers of failure are kept apart on purpose:
//!
//! - [`ConnError`] is what a single store request attempt reports. It carries
//!   the store's retry hint so the retrying wrapper can decide whether another
//!   attempt makes sense.
//! - [`StoreError`] is what callers of the data access layer see: a request
//!   that failed for good (non-retryable, or retries exhausted), or one of the
//!   domain-level failures (unknown user, key collision, schema drift).
//!
//! A failed *condition* on a conditional write is neither of these. It is a
//! legitimate outcome and travels as a value (`WriteOutcome::ConditionFailed`,
//! `UpdateOutcome::ConditionFailed`), never as an error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure of a single request attempt against the backing store.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConnError {
    /// Store-side error message.
    pub message: String,
    /// Whether the store suggests trying the request again.
    pub retryable: bool,
}

impl ConnError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A store request failed permanently: the error was not retryable, or
    /// the configured number of attempts was exhausted.
    #[error("failed to {action}: {detail}")]
    Request { action: String, detail: String },

    /// A conditional insert hit a row with the same key.
    #[error("failed to {action}: record with same key already existed")]
    AlreadyExists { action: String },

    #[error("user '{0}' not found")]
    UserNotFound(String),

    /// A row came back without an attribute the schema mandates.
    #[error("cannot recognize schema of {table} item: missing or mistyped attribute {attribute}")]
    SchemaMismatch {
        table: &'static str,
        attribute: &'static str,
    },

    /// A batch write left items unprocessed even after retrying every chunk.
    #[error("failed to {action}: {unprocessed} items left unprocessed out of {total} in total")]
    Unprocessed {
        action: String,
        unprocessed: usize,
        total: usize,
    },
}

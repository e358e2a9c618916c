//! Retry Logic for Store Requests
//!
//! Wraps every store primitive with a bounded number of attempts and a fixed
//! sleep between them.
//!
//! ## Retryable vs non-retryable
//!
//! Each attempt reports a [`ConnError`] carrying the store's own retry hint:
//!
//! - *retryable* (throttling, timeouts, transport failures): sleep and try
//!   again, up to the attempt cap
//! - *non-retryable* (validation failures, missing tables, access errors):
//!   give up immediately
//!
//! A failed write condition never reaches this module as an error; the
//! connection reports it as an outcome value and it returns to the caller on
//! the first attempt, untouched by the retry loop.
//!
//! ## Examples
//!
//! ```ignore
//! use newsfeed_store::retry::{with_retry, RetryPolicy};
//!
//! let policy = RetryPolicy::default(); // 2 attempts, 30ms apart
//!
//! let item = with_retry(&policy, "get user from database", || {
//!     conn.get_item(TABLE, (PK, Value::S(user.into())), &[ATTR])
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::conn::{Item, StoreConnection};
use crate::error::{ConnError, StoreError};

/// Maximum number of write requests the store accepts in one batch.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Retry policy for store requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts per request (first try included).
    pub max_attempts: u32,

    /// Fixed sleep between attempts.
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_interval: Duration::from_millis(30),
        }
    }
}

/// Run a store request with bounded retry.
///
/// `action` labels the request in logs and in the final error ("failed to
/// {action}: ..."). Retryable errors sleep `retry_interval` and try again;
/// a non-retryable error, or running out of attempts, becomes a
/// [`StoreError::Request`] carrying the last store-side message.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    action: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<ConnError> = None;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(action, attempt, "store request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.retryable => {
                warn!(
                    action,
                    attempt,
                    max_attempts,
                    error = %err,
                    "retryable store error"
                );
                last_error = Some(err);
                if attempt < max_attempts {
                    sleep(policy.retry_interval).await;
                }
            }
            Err(err) => {
                warn!(action, error = %err, "non-retryable store error, giving up");
                return Err(StoreError::Request {
                    action: action.to_string(),
                    detail: err.message,
                });
            }
        }
    }

    Err(StoreError::Request {
        action: action.to_string(),
        detail: last_error
            .map(|err| err.message)
            .unwrap_or_else(|| "retries exhausted".to_string()),
    })
}

/// Delete `keys` in batches of at most [`MAX_BATCH_WRITE_ITEMS`].
///
/// Each chunk gets the full retry discipline. A chunk that still fails after
/// retrying counts entirely as unprocessed, and the remaining chunks are
/// still submitted; a non-zero total at the end is fatal.
pub async fn batch_delete_all(
    policy: &RetryPolicy,
    conn: &dyn StoreConnection,
    action: &str,
    table: &str,
    keys: Vec<Item>,
) -> Result<(), StoreError> {
    let total = keys.len();
    let mut unprocessed = 0;

    for chunk in keys.chunks(MAX_BATCH_WRITE_ITEMS) {
        let outcome = with_retry(policy, action, || {
            conn.batch_delete(table, chunk.to_vec())
        })
        .await;

        match outcome {
            Ok(left_over) => unprocessed += left_over,
            Err(err) => {
                warn!(action, error = %err, "batch chunk failed; counting it as unprocessed");
                unprocessed += chunk.len();
            }
        }
    }

    if unprocessed > 0 {
        return Err(StoreError::Unprocessed {
            action: action.to_string(),
            unprocessed,
            total,
        });
    }

    Ok(())
}

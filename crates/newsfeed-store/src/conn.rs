//! Store Connection Abstraction
//!
//! The data access layer talks to the backing key-value store through the
//! [`StoreConnection`] trait: five single-attempt primitives over a minimal
//! item model. Keeping the seam here lets the same access code run against
//! DynamoDB in production and the in-memory backend in development and tests,
//! and keeps the retry discipline in one place (see [`crate::retry`]) instead
//! of inside every backend.
//!
//! Conditional writes report a failed condition as a *value*
//! ([`WriteOutcome::ConditionFailed`] / [`UpdateOutcome::ConditionFailed`]),
//! not as an error: for a get-or-create handshake the condition failing is a
//! perfectly ordinary answer.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ConnError;

/// Attribute value of a stored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// String.
    S(String),
    /// Number, held as seconds-since-epoch or similar integral values.
    N(i64),
    /// Binary.
    B(Vec<u8>),
    /// Explicitly null attribute (present, but unset).
    Null,
}

impl Value {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Value::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            Value::N(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            Value::B(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// A stored item: attribute name to value.
pub type Item = HashMap<String, Value>;

/// Precondition attached to a conditional write.
#[derive(Debug, Clone)]
pub enum Guard {
    /// The attribute must not be present on the stored item. Guarding on a
    /// key attribute turns a put into insert-not-replace.
    AttributeNotExists(&'static str),
    /// The attribute must be present and equal to the given value.
    AttributeEquals(&'static str, Value),
}

/// Outcome of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    ConditionFailed,
}

/// Outcome of a conditional update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The update applied; `old` carries the previous values of the updated
    /// attributes (the store's RETURN UPDATED_OLD contract).
    Applied { old: Item },
    ConditionFailed,
}

/// Bound on the binary range key of a query.
#[derive(Debug, Clone)]
pub enum RangeCond {
    /// range key < bound
    Below(Vec<u8>),
    /// range key >= bound
    AtLeast(Vec<u8>),
}

/// A connection to the backing store.
///
/// Every method is a single request attempt; retry and backoff are layered
/// on top by [`crate::retry::with_retry`]. Implementations must be thread
/// safe: a connection is owned by one task at a time while borrowed from the
/// pool, but the pool itself moves connections across tasks freely.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Fetch a single item by its partition key, projecting `attrs`.
    /// Returns `None` when no item matches.
    async fn get_item(
        &self,
        table: &str,
        key: (&'static str, Value),
        attrs: &[&'static str],
    ) -> Result<Option<Item>, ConnError>;

    /// Put an item, optionally guarded. A guarded put whose condition does
    /// not hold reports [`WriteOutcome::ConditionFailed`].
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        guard: Option<Guard>,
    ) -> Result<WriteOutcome, ConnError>;

    /// Apply `assignments` to the item at `key`, optionally guarded, and
    /// return the previous values of the assigned attributes.
    async fn update_item(
        &self,
        table: &str,
        key: (&'static str, Value),
        assignments: Item,
        guard: Option<Guard>,
    ) -> Result<UpdateOutcome, ConnError>;

    /// Range-scan one partition. Items come back in range-key order; an
    /// empty result is not an error.
    async fn query(
        &self,
        table: &str,
        partition: (&'static str, Value),
        range: (&'static str, RangeCond),
    ) -> Result<Vec<Item>, ConnError>;

    /// Delete up to one batch worth of keys (25, the store's batch limit).
    /// Returns how many deletions the store left unprocessed.
    async fn batch_delete(&self, table: &str, keys: Vec<Item>) -> Result<usize, ConnError>;
}

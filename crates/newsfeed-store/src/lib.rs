//! News Feed Durable Data Layer
//!
//! This crate owns everything between the session engine and the backing
//! key-value store:
//!
//! ```text
//! ┌────────────────┐
//! │ session engine │
//! └───────┬────────┘
//!         │ get_or_create_user / set_user_topic / post_news / fetch_news_since
//!         ▼
//! ┌────────────────┐     ┌──────────────────┐
//! │   FeedStore    │ ──▶ │    ConnPool      │ self-tuning, scope-released
//! │  (access.rs)   │     └────────┬─────────┘
//! └───────┬────────┘              │
//!         │ retrying wrapper      ▼
//!         │ (retry.rs)   ┌──────────────────┐
//!         └────────────▶ │ StoreConnection  │ DynamoDB | in-memory
//!                        └──────────────────┘
//! ```
//!
//! ## Layers
//!
//! - [`keys`]: the binary time-ordered range key for news rows
//! - [`conn`]: the store-connection seam (items, guards, outcomes)
//! - [`dynamo`] / [`memory`]: the two backends
//! - [`retry`]: bounded retry with the store's retryable hint, batch chunking
//! - [`pool`]: connection pool sized by a time-weighted average of demand
//! - [`access`]: the four durable operations the service is built on
//!
//! ## Thread safety
//!
//! [`FeedStore`] is `Send + Sync` and is shared across sessions via
//! `Arc<FeedStore>`; each operation borrows its own pooled connection.

pub mod access;
pub mod conn;
pub mod dynamo;
pub mod error;
pub mod keys;
pub mod memory;
pub mod pool;
pub mod retry;

pub use access::FeedStore;
pub use conn::{Guard, Item, RangeCond, StoreConnection, UpdateOutcome, Value, WriteOutcome};
pub use dynamo::{DynamoConnection, DynamoFactory};
pub use error::{ConnError, Result, StoreError};
pub use keys::{make_range_key, time_from_range_key, RANGE_KEY_LEN};
pub use memory::{MemoryConnection, MemoryFactory, MemoryStore};
pub use pool::{ConnPool, ConnectionFactory, PooledConn};
pub use retry::RetryPolicy;

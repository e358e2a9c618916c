//! Data Access Layer
//!
//! The four durable operations behind the session engine, over two tables:
//!
//! - **`newsfeed_topic_by_user`**: partition key `user_id`; attributes
//!   `topic` (string or null) and `last_feed_time` (epoch seconds or null).
//! - **`newsfeed_news_by_topic`**: partition key `topic`, binary range key
//!   `bin_time_based_sk` (see [`crate::keys`]); attribute `news`.
//!
//! Connections are borrowed from the embedded pool per operation and given
//! back when the operation's guard goes out of scope.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::conn::{Guard, Item, RangeCond, StoreConnection, UpdateOutcome, Value, WriteOutcome};
use crate::error::{Result, StoreError};
use crate::keys::{make_range_key, time_from_range_key};
use crate::memory::{MemoryFactory, MemoryStore};
use crate::pool::{ConnPool, ConnectionFactory};
use crate::retry::{batch_delete_all, with_retry, RetryPolicy};

pub const TABLE_TOPIC_BY_USER: &str = "newsfeed_topic_by_user";
pub const ATTR_USER_ID: &str = "user_id";
pub const ATTR_TOPIC: &str = "topic";
pub const ATTR_LAST_FEED_TIME: &str = "last_feed_time";

pub const TABLE_NEWS_BY_TOPIC: &str = "newsfeed_news_by_topic";
pub const ATTR_SORT_KEY: &str = "bin_time_based_sk";
pub const ATTR_NEWS: &str = "news";

/// Durable state behind the news feed service.
pub struct FeedStore {
    pool: ConnPool,
    retry: RetryPolicy,
    purge_age_secs: i64,
}

impl FeedStore {
    pub fn new(factory: Box<dyn ConnectionFactory>, retry: RetryPolicy, purge_age: Duration) -> Self {
        Self {
            pool: ConnPool::new(factory),
            retry,
            purge_age_secs: purge_age.as_secs() as i64,
        }
    }

    /// A store backed by in-process tables, for development and tests.
    /// Also hands back the underlying [`MemoryStore`] so tests can seed rows
    /// directly.
    pub fn in_memory(retry: RetryPolicy, purge_age: Duration) -> (Self, Arc<MemoryStore>) {
        let memory = MemoryStore::new();
        memory.create_table(TABLE_TOPIC_BY_USER, ATTR_USER_ID, None);
        memory.create_table(TABLE_NEWS_BY_TOPIC, ATTR_TOPIC, Some(ATTR_SORT_KEY));

        let store = Self::new(
            Box::new(MemoryFactory::new(memory.clone())),
            retry,
            purge_age,
        );
        (store, memory)
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// Look the user up, creating the row on first registration.
    ///
    /// Returns the topic the user currently subscribes to, or an empty
    /// string for none. The insert is guarded on the key, so two sessions
    /// racing to register the same fresh user cannot both win; the loser
    /// gets [`StoreError::AlreadyExists`], which callers treat as fatal
    /// because registration is serialized per stream.
    pub async fn get_or_create_user(&self, user_id: &str) -> Result<String> {
        let conn = self.pool.acquire();

        let found = with_retry(
            &self.retry,
            "get user from database table newsfeed_topic_by_user",
            || {
                conn.get_item(
                    TABLE_TOPIC_BY_USER,
                    (ATTR_USER_ID, Value::S(user_id.to_string())),
                    &[ATTR_TOPIC],
                )
            },
        )
        .await?;

        if let Some(item) = found {
            let topic = match item.get(ATTR_TOPIC) {
                Some(Value::S(topic)) => topic.clone(),
                Some(Value::Null) => String::new(),
                _ => {
                    return Err(StoreError::SchemaMismatch {
                        table: TABLE_TOPIC_BY_USER,
                        attribute: ATTR_TOPIC,
                    })
                }
            };
            return Ok(topic);
        }

        let mut item = Item::new();
        item.insert(ATTR_USER_ID.to_string(), Value::S(user_id.to_string()));
        item.insert(ATTR_TOPIC.to_string(), Value::Null);
        item.insert(ATTR_LAST_FEED_TIME.to_string(), Value::Null);

        let outcome = with_retry(
            &self.retry,
            "put new user into database table newsfeed_topic_by_user",
            || {
                conn.put_item(
                    TABLE_TOPIC_BY_USER,
                    item.clone(),
                    Some(Guard::AttributeNotExists(ATTR_USER_ID)),
                )
            },
        )
        .await?;

        match outcome {
            WriteOutcome::Applied => Ok(String::new()),
            WriteOutcome::ConditionFailed => Err(StoreError::AlreadyExists {
                action: "create new user on table newsfeed_topic_by_user".to_string(),
            }),
        }
    }

    /// Point the user at `new_topic` (empty string to unsubscribe) and reset
    /// the last feed time to now.
    ///
    /// An unsubscribe additionally sweeps the topic the user just left:
    /// every news row older than the purge age is deleted. The sweep runs
    /// only when the update applied and there actually was a previous topic.
    pub async fn set_user_topic(&self, user_id: &str, new_topic: &str) -> Result<()> {
        let now = Self::now();

        let mut assignments = Item::new();
        assignments.insert(
            ATTR_TOPIC.to_string(),
            if new_topic.is_empty() {
                Value::Null
            } else {
                Value::S(new_topic.to_string())
            },
        );
        assignments.insert(ATTR_LAST_FEED_TIME.to_string(), Value::N(now));

        let conn = self.pool.acquire();

        let outcome = with_retry(
            &self.retry,
            "update user data in table newsfeed_topic_by_user",
            || {
                conn.update_item(
                    TABLE_TOPIC_BY_USER,
                    (ATTR_USER_ID, Value::S(user_id.to_string())),
                    assignments.clone(),
                    None,
                )
            },
        )
        .await?;

        let old = match outcome {
            UpdateOutcome::Applied { old } => old,
            UpdateOutcome::ConditionFailed => return Ok(()),
        };

        // A subscription needs no sweep.
        if !new_topic.is_empty() {
            return Ok(());
        }

        let prev_topic = match old.get(ATTR_TOPIC) {
            Some(Value::S(topic)) if !topic.is_empty() => topic.clone(),
            // The user was not subscribed to anything; nothing to purge.
            _ => return Ok(()),
        };

        let bound = make_range_key(now - self.purge_age_secs, "");
        let expired = with_retry(&self.retry, "get expired news from database table", || {
            conn.query(
                TABLE_NEWS_BY_TOPIC,
                (ATTR_TOPIC, Value::S(prev_topic.clone())),
                (ATTR_SORT_KEY, RangeCond::Below(bound.to_vec())),
            )
        })
        .await?;

        if expired.is_empty() {
            return Ok(());
        }

        let mut keys = Vec::with_capacity(expired.len());
        for row in expired {
            let sort_key = match row.get(ATTR_SORT_KEY) {
                Some(Value::B(bytes)) => bytes.clone(),
                _ => {
                    return Err(StoreError::SchemaMismatch {
                        table: TABLE_NEWS_BY_TOPIC,
                        attribute: ATTR_SORT_KEY,
                    })
                }
            };
            let mut key = Item::new();
            key.insert(ATTR_TOPIC.to_string(), Value::S(prev_topic.clone()));
            key.insert(ATTR_SORT_KEY.to_string(), Value::B(sort_key));
            keys.push(key);
        }

        batch_delete_all(
            &self.retry,
            &*conn,
            "purge expired news from database",
            TABLE_NEWS_BY_TOPIC,
            keys,
        )
        .await
    }

    /// Insert one news row into `topic`, keyed by posting time and poster.
    ///
    /// The insert is guarded so an existing row is never replaced; the guard
    /// only ever fires when the same user posts twice within one second.
    pub async fn post_news(&self, topic: &str, user_id: &str, news: &str) -> Result<()> {
        let mut item = Item::new();
        item.insert(ATTR_TOPIC.to_string(), Value::S(topic.to_string()));
        item.insert(
            ATTR_SORT_KEY.to_string(),
            Value::B(make_range_key(Self::now(), user_id).to_vec()),
        );
        item.insert(ATTR_NEWS.to_string(), Value::S(news.to_string()));

        let conn = self.pool.acquire();

        let outcome = with_retry(
            &self.retry,
            "put news in database table newsfeed_news_by_topic",
            || {
                conn.put_item(
                    TABLE_NEWS_BY_TOPIC,
                    item.clone(),
                    Some(Guard::AttributeNotExists(ATTR_TOPIC)),
                )
            },
        )
        .await?;

        match outcome {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::ConditionFailed => Err(StoreError::AlreadyExists {
                action: "put news in table newsfeed_news_by_topic".to_string(),
            }),
        }
    }

    /// Return every news row in the user's topic strictly newer than the
    /// last feed time, and advance the bookmark past what was returned.
    ///
    /// The lower bound is `last_feed_time + 1` with the all-zero hash
    /// suffix, the canonical "strictly after" delimiter at second
    /// granularity. The bookmark update is guarded on the topic fetched at
    /// the start; if the user re-subscribed mid-fetch the update is skipped
    /// with a warning and the already-fetched news is still returned.
    pub async fn fetch_news_since(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.pool.acquire();

        let user = with_retry(
            &self.retry,
            "get user from database table newsfeed_topic_by_user",
            || {
                conn.get_item(
                    TABLE_TOPIC_BY_USER,
                    (ATTR_USER_ID, Value::S(user_id.to_string())),
                    &[ATTR_TOPIC, ATTR_LAST_FEED_TIME],
                )
            },
        )
        .await?
        .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;

        let topic = match user.get(ATTR_TOPIC) {
            Some(Value::S(topic)) => topic.clone(),
            Some(Value::Null) => return Ok(Vec::new()),
            _ => {
                return Err(StoreError::SchemaMismatch {
                    table: TABLE_TOPIC_BY_USER,
                    attribute: ATTR_TOPIC,
                })
            }
        };
        if topic.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_feed_time = match user.get(ATTR_LAST_FEED_TIME) {
            Some(Value::N(time)) => *time,
            Some(Value::Null) => i64::MIN,
            _ => {
                return Err(StoreError::SchemaMismatch {
                    table: TABLE_TOPIC_BY_USER,
                    attribute: ATTR_LAST_FEED_TIME,
                })
            }
        };

        let bound = make_range_key(last_feed_time.saturating_add(1), "");
        let rows = with_retry(&self.retry, "get news from database table", || {
            conn.query(
                TABLE_NEWS_BY_TOPIC,
                (ATTR_TOPIC, Value::S(topic.clone())),
                (ATTR_SORT_KEY, RangeCond::AtLeast(bound.to_vec())),
            )
        })
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut news = Vec::with_capacity(rows.len());
        for row in rows {
            let sort_key = match row.get(ATTR_SORT_KEY) {
                Some(Value::B(bytes)) if bytes.len() >= 8 => bytes,
                _ => {
                    return Err(StoreError::SchemaMismatch {
                        table: TABLE_NEWS_BY_TOPIC,
                        attribute: ATTR_SORT_KEY,
                    })
                }
            };

            let seen = time_from_range_key(sort_key);
            if seen >= last_feed_time {
                last_feed_time = seen;
            }

            match row.get(ATTR_NEWS) {
                Some(Value::S(body)) => news.push(body.clone()),
                _ => {
                    return Err(StoreError::SchemaMismatch {
                        table: TABLE_NEWS_BY_TOPIC,
                        attribute: ATTR_NEWS,
                    })
                }
            }
        }

        let mut assignment = Item::new();
        assignment.insert(ATTR_LAST_FEED_TIME.to_string(), Value::N(last_feed_time));

        let outcome = with_retry(
            &self.retry,
            "update user data in table newsfeed_topic_by_user",
            || {
                conn.update_item(
                    TABLE_TOPIC_BY_USER,
                    (ATTR_USER_ID, Value::S(user_id.to_string())),
                    assignment.clone(),
                    Some(Guard::AttributeEquals(ATTR_TOPIC, Value::S(topic.clone()))),
                )
            },
        )
        .await?;

        if matches!(outcome, UpdateOutcome::ConditionFailed) {
            warn!(
                user_id,
                topic,
                "last feed time not advanced: user topic changed during fetch"
            );
        }

        Ok(news)
    }
}

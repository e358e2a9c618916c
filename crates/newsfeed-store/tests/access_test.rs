//! Data access layer tests against the in-memory backend.
//!
//! News rows are seeded through a raw connection with hand-built range keys
//! so timing-sensitive behavior (purge bounds, last-feed-time advancement)
//! is deterministic regardless of when the test runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use newsfeed_store::access::{
    ATTR_LAST_FEED_TIME, ATTR_NEWS, ATTR_SORT_KEY, ATTR_TOPIC, ATTR_USER_ID, TABLE_NEWS_BY_TOPIC,
    TABLE_TOPIC_BY_USER,
};
use newsfeed_store::{
    make_range_key, FeedStore, Item, MemoryConnection, MemoryStore, RangeCond, RetryPolicy,
    StoreConnection, StoreError, Value,
};

const PURGE_AGE_SECS: u64 = 60;

fn setup() -> (FeedStore, Arc<MemoryStore>) {
    FeedStore::in_memory(
        RetryPolicy::default(),
        Duration::from_secs(PURGE_AGE_SECS),
    )
}

/// Seed one news row with an explicit posting time.
async fn seed_news(memory: &Arc<MemoryStore>, topic: &str, at: i64, user: &str, body: &str) {
    let conn = MemoryConnection::new(memory.clone());
    let mut item = Item::new();
    item.insert(ATTR_TOPIC.to_string(), Value::S(topic.to_string()));
    item.insert(
        ATTR_SORT_KEY.to_string(),
        Value::B(make_range_key(at, user).to_vec()),
    );
    item.insert(ATTR_NEWS.to_string(), Value::S(body.to_string()));
    conn.put_item(TABLE_NEWS_BY_TOPIC, item, None).await.unwrap();
}

async fn news_in_topic(memory: &Arc<MemoryStore>, topic: &str) -> Vec<String> {
    let conn = MemoryConnection::new(memory.clone());
    let rows = conn
        .query(
            TABLE_NEWS_BY_TOPIC,
            (ATTR_TOPIC, Value::S(topic.to_string())),
            (ATTR_SORT_KEY, RangeCond::AtLeast(Vec::new())),
        )
        .await
        .unwrap();
    rows.iter()
        .map(|row| row.get(ATTR_NEWS).unwrap().as_s().unwrap().to_string())
        .collect()
}

async fn last_feed_time(memory: &Arc<MemoryStore>, user: &str) -> Option<i64> {
    let conn = MemoryConnection::new(memory.clone());
    let item = conn
        .get_item(
            TABLE_TOPIC_BY_USER,
            (ATTR_USER_ID, Value::S(user.to_string())),
            &[ATTR_LAST_FEED_TIME],
        )
        .await
        .unwrap()
        .expect("user row should exist");
    item.get(ATTR_LAST_FEED_TIME).and_then(Value::as_n)
}

#[tokio::test]
async fn test_first_registration_creates_user_without_topic() {
    let (store, _memory) = setup();

    let topic = store.get_or_create_user("alice").await.unwrap();
    assert_eq!(topic, "");

    // The second lookup finds the row instead of inserting again.
    let topic = store.get_or_create_user("alice").await.unwrap();
    assert_eq!(topic, "");
}

#[tokio::test]
async fn test_registration_returns_current_topic() {
    let (store, _memory) = setup();

    store.get_or_create_user("alice").await.unwrap();
    store.set_user_topic("alice", "sports").await.unwrap();

    let topic = store.get_or_create_user("alice").await.unwrap();
    assert_eq!(topic, "sports");
}

#[tokio::test]
async fn test_subscription_is_idempotent() {
    let (store, memory) = setup();
    let now = Utc::now().timestamp();

    store.get_or_create_user("alice").await.unwrap();
    seed_news(&memory, "sports", now - 120, "bob", "old").await;

    store.set_user_topic("alice", "sports").await.unwrap();
    store.set_user_topic("alice", "sports").await.unwrap();

    let topic = store.get_or_create_user("alice").await.unwrap();
    assert_eq!(topic, "sports");
    // Re-subscribing must not sweep anything, however old the news is.
    assert_eq!(news_in_topic(&memory, "sports").await, vec!["old"]);
}

#[tokio::test]
async fn test_unsubscribe_purges_only_news_older_than_purge_age() {
    let (store, memory) = setup();
    let now = Utc::now().timestamp();

    store.get_or_create_user("alice").await.unwrap();
    store.set_user_topic("alice", "sports").await.unwrap();

    for (age, body) in [(120, "a"), (90, "b"), (30, "c"), (10, "d"), (0, "e")] {
        seed_news(&memory, "sports", now - age, "bob", body).await;
    }

    store.set_user_topic("alice", "").await.unwrap();

    // Only the rows inside the purge window survive.
    assert_eq!(news_in_topic(&memory, "sports").await, vec!["c", "d", "e"]);
}

#[tokio::test]
async fn test_unsubscribe_leaves_other_topics_alone() {
    let (store, memory) = setup();
    let now = Utc::now().timestamp();

    store.get_or_create_user("alice").await.unwrap();
    store.set_user_topic("alice", "sports").await.unwrap();

    seed_news(&memory, "sports", now - 120, "bob", "stale-sports").await;
    seed_news(&memory, "politics", now - 120, "bob", "stale-politics").await;

    store.set_user_topic("alice", "").await.unwrap();

    assert!(news_in_topic(&memory, "sports").await.is_empty());
    assert_eq!(
        news_in_topic(&memory, "politics").await,
        vec!["stale-politics"]
    );
}

#[tokio::test]
async fn test_unsubscribe_without_subscription_is_a_no_op() {
    let (store, memory) = setup();
    let now = Utc::now().timestamp();

    store.get_or_create_user("alice").await.unwrap();
    seed_news(&memory, "sports", now - 120, "bob", "old").await;

    // No previous topic, so there is nothing to sweep.
    store.set_user_topic("alice", "").await.unwrap();
    assert_eq!(news_in_topic(&memory, "sports").await, vec!["old"]);
}

#[tokio::test]
async fn test_post_news_lands_in_topic() {
    let (store, memory) = setup();

    store.get_or_create_user("bob").await.unwrap();
    store.set_user_topic("bob", "sports").await.unwrap();
    store.post_news("sports", "bob", "hello").await.unwrap();

    assert_eq!(news_in_topic(&memory, "sports").await, vec!["hello"]);
}

#[tokio::test]
async fn test_fetch_returns_news_in_timestamp_order_and_advances_bookmark() {
    let (store, memory) = setup();

    store.get_or_create_user("alice").await.unwrap();
    store.set_user_topic("alice", "sports").await.unwrap();
    let subscribed_at = last_feed_time(&memory, "alice").await.unwrap();

    // Seeded out of chronological order on purpose.
    seed_news(&memory, "sports", subscribed_at + 20, "carol", "second").await;
    seed_news(&memory, "sports", subscribed_at + 10, "bob", "first").await;

    let news = store.fetch_news_since("alice").await.unwrap();
    assert_eq!(news, vec!["first", "second"]);
    assert_eq!(
        last_feed_time(&memory, "alice").await,
        Some(subscribed_at + 20)
    );

    // A later post shows up on the next poll, and only that one.
    seed_news(&memory, "sports", subscribed_at + 30, "bob", "third").await;
    let news = store.fetch_news_since("alice").await.unwrap();
    assert_eq!(news, vec!["third"]);
    assert_eq!(
        last_feed_time(&memory, "alice").await,
        Some(subscribed_at + 30)
    );

    // Nothing new: empty result, bookmark untouched.
    let news = store.fetch_news_since("alice").await.unwrap();
    assert!(news.is_empty());
    assert_eq!(
        last_feed_time(&memory, "alice").await,
        Some(subscribed_at + 30)
    );
}

#[tokio::test]
async fn test_subscription_begins_now() {
    let (store, memory) = setup();
    let now = Utc::now().timestamp();

    // News already in the topic before the user subscribes...
    seed_news(&memory, "sports", now - 30, "bob", "before-subscribe").await;

    store.get_or_create_user("alice").await.unwrap();
    store.set_user_topic("alice", "sports").await.unwrap();

    // ...is never delivered: the subscription bookmark starts at the time
    // of the subscribe call.
    let news = store.fetch_news_since("alice").await.unwrap();
    assert!(news.is_empty());

    let subscribed_at = last_feed_time(&memory, "alice").await.unwrap();
    seed_news(&memory, "sports", subscribed_at + 5, "bob", "after-subscribe").await;
    let news = store.fetch_news_since("alice").await.unwrap();
    assert_eq!(news, vec!["after-subscribe"]);
}

#[tokio::test]
async fn test_fetch_without_topic_returns_nothing() {
    let (store, _memory) = setup();

    store.get_or_create_user("alice").await.unwrap();
    let news = store.fetch_news_since("alice").await.unwrap();
    assert!(news.is_empty());
}

#[tokio::test]
async fn test_fetch_for_unknown_user_is_fatal() {
    let (store, _memory) = setup();

    let err = store.fetch_news_since("nobody").await.unwrap_err();
    assert!(matches!(err, StoreError::UserNotFound(user) if user == "nobody"));
}

#[tokio::test]
async fn test_posts_from_same_user_in_same_second_collide() {
    let (store, memory) = setup();
    let now = Utc::now().timestamp();

    store.get_or_create_user("bob").await.unwrap();
    store.set_user_topic("bob", "sports").await.unwrap();

    seed_news(&memory, "sports", now + 60, "bob", "first").await;

    // Seeding pinned the row at a future second; a direct re-insert of the
    // same (topic, range key) pair must hit the insert guard.
    let conn = MemoryConnection::new(memory.clone());
    let mut duplicate = Item::new();
    duplicate.insert(ATTR_TOPIC.to_string(), Value::S("sports".to_string()));
    duplicate.insert(
        ATTR_SORT_KEY.to_string(),
        Value::B(make_range_key(now + 60, "bob").to_vec()),
    );
    duplicate.insert(ATTR_NEWS.to_string(), Value::S("second".to_string()));
    let outcome = conn
        .put_item(
            TABLE_NEWS_BY_TOPIC,
            duplicate,
            Some(newsfeed_store::Guard::AttributeNotExists(ATTR_TOPIC)),
        )
        .await
        .unwrap();
    assert_eq!(outcome, newsfeed_store::WriteOutcome::ConditionFailed);

    assert_eq!(news_in_topic(&memory, "sports").await, vec!["first"]);
}

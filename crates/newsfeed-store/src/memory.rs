//! In-memory Store Backend
//!
//! A process-local implementation of [`StoreConnection`] backed by ordinary
//! maps. It exists for two reasons:
//!
//! - **Development**: run the whole server without AWS credentials
//!   (`NEWSFEED_USE_MEMORY_STORE=1`).
//! - **Tests**: exercise the data access layer against real conditional-write
//!   and range-query semantics without network I/O.
//!
//! Partitions are keyed by their string partition value; within a partition,
//! items live in a `BTreeMap` keyed by the binary range key so range scans
//! come back in lexicographic (= chronological) order. Tables without a
//! range key store their single item under an empty key.
//!
//! Tables must be registered up front with [`MemoryStore::create_table`],
//! mirroring how the real store requires its schema to exist.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::conn::{Guard, Item, RangeCond, StoreConnection, UpdateOutcome, Value, WriteOutcome};
use crate::error::ConnError;
use crate::pool::ConnectionFactory;

#[derive(Debug, Clone, Copy)]
struct KeySchema {
    partition: &'static str,
    sort: Option<&'static str>,
}

#[derive(Default)]
struct Table {
    // partition key value -> range key bytes -> item
    partitions: HashMap<String, BTreeMap<Vec<u8>, Item>>,
}

/// Shared in-process tables. Connections are cheap handles onto this.
pub struct MemoryStore {
    schemas: Mutex<HashMap<String, KeySchema>>,
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            schemas: Mutex::new(HashMap::new()),
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Register a table and its key schema.
    pub fn create_table(&self, name: &str, partition: &'static str, sort: Option<&'static str>) {
        self.schemas
            .lock()
            .insert(name.to_string(), KeySchema { partition, sort });
        self.tables.lock().insert(name.to_string(), Table::default());
    }

    fn schema(&self, table: &str) -> Result<KeySchema, ConnError> {
        self.schemas
            .lock()
            .get(table)
            .copied()
            .ok_or_else(|| ConnError::fatal(format!("table not found: {table}")))
    }
}

fn partition_value(value: &Value) -> Result<String, ConnError> {
    value
        .as_s()
        .map(str::to_string)
        .ok_or_else(|| ConnError::fatal("partition key must be a string"))
}

fn item_keys(schema: &KeySchema, item: &Item) -> Result<(String, Vec<u8>), ConnError> {
    let partition = item
        .get(schema.partition)
        .and_then(Value::as_s)
        .ok_or_else(|| {
            ConnError::fatal(format!("item is missing partition key {}", schema.partition))
        })?
        .to_string();

    let sort = match schema.sort {
        Some(attr) => item
            .get(attr)
            .and_then(Value::as_b)
            .ok_or_else(|| ConnError::fatal(format!("item is missing range key {attr}")))?
            .to_vec(),
        None => Vec::new(),
    };

    Ok((partition, sort))
}

fn guard_passes(existing: Option<&Item>, guard: &Guard) -> bool {
    match guard {
        Guard::AttributeNotExists(attr) => match existing {
            Some(item) => !item.contains_key(*attr),
            None => true,
        },
        Guard::AttributeEquals(attr, expected) => match existing {
            Some(item) => item.get(*attr) == Some(expected),
            None => false,
        },
    }
}

/// One borrowed handle onto a [`MemoryStore`].
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
}

impl MemoryConnection {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get_item(
        &self,
        table: &str,
        key: (&'static str, Value),
        attrs: &[&'static str],
    ) -> Result<Option<Item>, ConnError> {
        let schema = self.store.schema(table)?;
        if key.0 != schema.partition {
            return Err(ConnError::fatal(format!(
                "{} is not the partition key of {table}",
                key.0
            )));
        }
        let partition = partition_value(&key.1)?;

        let tables = self.store.tables.lock();
        let item = tables
            .get(table)
            .and_then(|t| t.partitions.get(&partition))
            .and_then(|p| p.get(&Vec::new()))
            .map(|item| {
                item.iter()
                    .filter(|(attr, _)| {
                        attrs.is_empty() || attrs.iter().any(|wanted| *wanted == attr.as_str())
                    })
                    .map(|(attr, value)| (attr.clone(), value.clone()))
                    .collect()
            });

        Ok(item)
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        guard: Option<Guard>,
    ) -> Result<WriteOutcome, ConnError> {
        let schema = self.store.schema(table)?;
        let (partition, sort) = item_keys(&schema, &item)?;

        let mut tables = self.store.tables.lock();
        let slot = tables
            .get_mut(table)
            .ok_or_else(|| ConnError::fatal(format!("table not found: {table}")))?
            .partitions
            .entry(partition)
            .or_default();

        if let Some(guard) = &guard {
            if !guard_passes(slot.get(&sort), guard) {
                return Ok(WriteOutcome::ConditionFailed);
            }
        }

        slot.insert(sort, item);
        Ok(WriteOutcome::Applied)
    }

    async fn update_item(
        &self,
        table: &str,
        key: (&'static str, Value),
        assignments: Item,
        guard: Option<Guard>,
    ) -> Result<UpdateOutcome, ConnError> {
        let schema = self.store.schema(table)?;
        let partition = partition_value(&key.1)?;

        let mut tables = self.store.tables.lock();
        let slot = tables
            .get_mut(table)
            .ok_or_else(|| ConnError::fatal(format!("table not found: {table}")))?
            .partitions
            .entry(partition.clone())
            .or_default();

        let existing = slot.get(&Vec::new());
        if let Some(guard) = &guard {
            if !guard_passes(existing, guard) {
                return Ok(UpdateOutcome::ConditionFailed);
            }
        }

        // Updating a missing item creates it, as the real store does.
        let mut updated = existing.cloned().unwrap_or_else(|| {
            let mut fresh = Item::new();
            fresh.insert(key.0.to_string(), key.1.clone());
            fresh
        });

        let mut old = Item::new();
        for (attr, value) in assignments {
            if let Some(previous) = updated.insert(attr.clone(), value) {
                old.insert(attr, previous);
            }
        }

        slot.insert(Vec::new(), updated);
        Ok(UpdateOutcome::Applied { old })
    }

    async fn query(
        &self,
        table: &str,
        partition: (&'static str, Value),
        range: (&'static str, RangeCond),
    ) -> Result<Vec<Item>, ConnError> {
        let schema = self.store.schema(table)?;
        if schema.sort != Some(range.0) {
            return Err(ConnError::fatal(format!(
                "{} is not the range key of {table}",
                range.0
            )));
        }
        let partition = partition_value(&partition.1)?;

        let tables = self.store.tables.lock();
        let Some(rows) = tables.get(table).and_then(|t| t.partitions.get(&partition)) else {
            return Ok(Vec::new());
        };

        let items = match &range.1 {
            RangeCond::Below(bound) => rows
                .range(..bound.clone())
                .map(|(_, item)| item.clone())
                .collect(),
            RangeCond::AtLeast(bound) => rows
                .range(bound.clone()..)
                .map(|(_, item)| item.clone())
                .collect(),
        };

        Ok(items)
    }

    async fn batch_delete(&self, table: &str, keys: Vec<Item>) -> Result<usize, ConnError> {
        let schema = self.store.schema(table)?;

        let mut tables = self.store.tables.lock();
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| ConnError::fatal(format!("table not found: {table}")))?;

        for key in keys {
            let (partition, sort) = item_keys(&schema, &key)?;
            if let Some(rows) = stored.partitions.get_mut(&partition) {
                rows.remove(&sort);
            }
        }

        Ok(0)
    }
}

/// Builds [`MemoryConnection`] handles for the pool.
pub struct MemoryFactory {
    store: Arc<MemoryStore>,
}

impl MemoryFactory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl ConnectionFactory for MemoryFactory {
    fn connect(&self) -> Box<dyn StoreConnection> {
        Box::new(MemoryConnection::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "news";
    const PK: &str = "topic";
    const SK: &str = "sk";

    fn store_with_news_table() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.create_table(TABLE, PK, Some(SK));
        store
    }

    fn news_item(topic: &str, sort: &[u8], body: &str) -> Item {
        let mut item = Item::new();
        item.insert(PK.to_string(), Value::S(topic.to_string()));
        item.insert(SK.to_string(), Value::B(sort.to_vec()));
        item.insert("news".to_string(), Value::S(body.to_string()));
        item
    }

    #[tokio::test]
    async fn test_conditional_put_rejects_duplicate_key() {
        let store = store_with_news_table();
        let conn = MemoryConnection::new(store);

        let first = conn
            .put_item(
                TABLE,
                news_item("sports", b"aaaa", "one"),
                Some(Guard::AttributeNotExists(PK)),
            )
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Applied);

        let second = conn
            .put_item(
                TABLE,
                news_item("sports", b"aaaa", "two"),
                Some(Guard::AttributeNotExists(PK)),
            )
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::ConditionFailed);
    }

    #[tokio::test]
    async fn test_query_respects_bounds_and_order() {
        let store = store_with_news_table();
        let conn = MemoryConnection::new(store);

        for (sort, body) in [(b"c".as_slice(), "3"), (b"a", "1"), (b"b", "2")] {
            conn.put_item(TABLE, news_item("sports", sort, body), None)
                .await
                .unwrap();
        }

        let below = conn
            .query(
                TABLE,
                (PK, Value::S("sports".into())),
                (SK, RangeCond::Below(b"c".to_vec())),
            )
            .await
            .unwrap();
        let bodies: Vec<_> = below
            .iter()
            .map(|item| item.get("news").unwrap().as_s().unwrap())
            .collect();
        assert_eq!(bodies, vec!["1", "2"]);

        let at_least = conn
            .query(
                TABLE,
                (PK, Value::S("sports".into())),
                (SK, RangeCond::AtLeast(b"b".to_vec())),
            )
            .await
            .unwrap();
        assert_eq!(at_least.len(), 2);

        let other_topic = conn
            .query(
                TABLE,
                (PK, Value::S("politics".into())),
                (SK, RangeCond::AtLeast(Vec::new())),
            )
            .await
            .unwrap();
        assert!(other_topic.is_empty());
    }

    #[tokio::test]
    async fn test_update_returns_previous_values_and_honors_guard() {
        let store = MemoryStore::new();
        store.create_table("users", "user_id", None);
        let conn = MemoryConnection::new(store);

        let mut first = Item::new();
        first.insert("topic".to_string(), Value::S("sports".into()));
        let outcome = conn
            .update_item("users", ("user_id", Value::S("alice".into())), first, None)
            .await
            .unwrap();
        // Nothing to report the first time around.
        match outcome {
            UpdateOutcome::Applied { old } => assert!(old.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut second = Item::new();
        second.insert("topic".to_string(), Value::S("politics".into()));
        let outcome = conn
            .update_item(
                "users",
                ("user_id", Value::S("alice".into())),
                second,
                Some(Guard::AttributeEquals("topic", Value::S("sports".into()))),
            )
            .await
            .unwrap();
        match outcome {
            UpdateOutcome::Applied { old } => {
                assert_eq!(old.get("topic"), Some(&Value::S("sports".into())));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut third = Item::new();
        third.insert("topic".to_string(), Value::S("weather".into()));
        let outcome = conn
            .update_item(
                "users",
                ("user_id", Value::S("alice".into())),
                third,
                Some(Guard::AttributeEquals("topic", Value::S("sports".into()))),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::ConditionFailed));
    }

    #[tokio::test]
    async fn test_batch_delete_removes_keys() {
        let store = store_with_news_table();
        let conn = MemoryConnection::new(store);

        for sort in [b"a", b"b", b"c"] {
            conn.put_item(TABLE, news_item("sports", sort, "x"), None)
                .await
                .unwrap();
        }

        let mut key = Item::new();
        key.insert(PK.to_string(), Value::S("sports".into()));
        key.insert(SK.to_string(), Value::B(b"b".to_vec()));
        let unprocessed = conn.batch_delete(TABLE, vec![key]).await.unwrap();
        assert_eq!(unprocessed, 0);

        let remaining = conn
            .query(
                TABLE,
                (PK, Value::S("sports".into())),
                (SK, RangeCond::AtLeast(Vec::new())),
            )
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table_is_fatal() {
        let store = MemoryStore::new();
        let conn = MemoryConnection::new(store);

        let err = conn
            .get_item("missing", ("pk", Value::S("x".into())), &[])
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}

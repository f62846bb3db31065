use crate::models::{ChangeEvent, Record};
use crate::Result;
use chrono::DateTime;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Buffered change events per live subscription
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Sort order for a bulk query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

/// Row predicate on a single field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _) | Filter::Gte(field, _) => field,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Filter::Eq(_, value) | Filter::Gte(_, value) => value,
        }
    }

    /// Rows missing the field never match
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(self.field()) else {
            return false;
        };
        if std::mem::discriminant(actual) != std::mem::discriminant(self.value()) {
            return false;
        }
        let ord = compare_values(actual, self.value());
        match self {
            Filter::Eq(..) => ord == Ordering::Equal,
            Filter::Gte(..) => ord != Ordering::Less,
        }
    }
}

/// Bulk query against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub order_by: Option<OrderBy>,
    pub limit: usize,
    /// Rows must match every filter
    pub filters: Vec<Filter>,
}

/// Live change feed for one table
///
/// Dropping the subscription tells the store to stop delivering.
pub struct Subscription {
    pub table: String,
    receiver: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(table: impl Into<String>, receiver: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            table: table.into(),
            receiver,
        }
    }

    /// Next change event, or `None` once the store side has closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

/// Remote data store backing a realtime collection
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch rows of a table, ordered and limited as requested
    async fn query(&self, query: &Query) -> Result<Vec<Record>>;

    /// Number of rows in `table` matching every filter
    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64>;

    /// Open a live change feed scoped to `table`
    async fn subscribe(&self, table: &str) -> Result<Subscription>;
}

/// Order two JSON values: nulls first, numbers numerically, RFC 3339
/// timestamps chronologically, other strings lexically
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    tables: HashMap<String, Vec<Record>>,
    subscribers: HashMap<String, Vec<mpsc::Sender<ChangeEvent>>>,
}

/// In-process store using Tokio channels for the change feed
///
/// Clones share the same tables and subscribers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows without emitting change events
    pub async fn seed(&self, table: &str, records: Vec<Record>) {
        let mut inner = self.inner.write().await;
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(records);
    }

    pub async fn insert(&self, table: &str, record: Record) {
        let mut inner = self.inner.write().await;
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Self::publish(&mut inner, table, ChangeEvent::insert(record)).await;
    }

    pub async fn update(&self, table: &str, record: Record) {
        let mut inner = self.inner.write().await;
        if let Some(rows) = inner.tables.get_mut(table) {
            if let Some(slot) = rows.iter_mut().find(|r| r.id() == record.id()) {
                *slot = record.clone();
            }
        }
        Self::publish(&mut inner, table, ChangeEvent::update(record)).await;
    }

    pub async fn delete(&self, table: &str, id: impl Into<Value>) {
        let record = Record::new(id);
        let mut inner = self.inner.write().await;
        if let Some(rows) = inner.tables.get_mut(table) {
            rows.retain(|r| r.id() != record.id());
        }
        Self::publish(&mut inner, table, ChangeEvent::delete(record)).await;
    }

    /// Number of live subscriptions still open for a table
    pub async fn subscriber_count(&self, table: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .subscribers
            .get(table)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    async fn publish(inner: &mut MemoryStoreInner, table: &str, event: ChangeEvent) {
        if let Some(subscribers) = inner.subscribers.get_mut(table) {
            subscribers.retain(|s| !s.is_closed());
            for sender in subscribers.iter() {
                // Receiver may have been dropped between retain and send
                let _ = sender.send(event.clone()).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Record>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Record> = inner
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filters.iter().all(|f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let null = Value::Null;
                let ord = compare_values(
                    a.get(&order.field).unwrap_or(&null),
                    b.get(&order.field).unwrap_or(&null),
                );
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let inner = self.inner.read().await;
        let count = inner
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| filters.iter().all(|f| f.matches(r)))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn subscribe(&self, table: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut inner = self.inner.write().await;
        inner
            .subscribers
            .entry(table.to_string())
            .or_default()
            .push(sender);

        tracing::debug!(table = %table, "Opened in-memory change feed");

        Ok(Subscription::new(table, receiver))
    }
}

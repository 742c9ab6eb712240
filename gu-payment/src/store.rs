//! Local persistence of subscription records.
//!
//! The lifecycle writes records through [`SubscriptionStore`] as flat rows keyed by the
//! configured column names, so any table layout chosen in
//! [`SubscriptionSchema`](crate::config::SubscriptionSchema) works without code changes.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};

/// A subscription record flattened to columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscriptionRow {
    /// Target table.
    pub table: String,
    /// Primary key, `None` before the first insert.
    pub id: Option<i64>,
    /// Column values, `Value::Null` for SQL `NULL`.
    pub columns: BTreeMap<String, Value>,
}

impl SubscriptionRow {
    /// Creates an empty row for `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), id: None, columns: BTreeMap::new() }
    }

    /// Returns a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Sets a column value.
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }
}

/// Persists subscription rows.
pub trait SubscriptionStore: Send + Sync {
    /// Inserts the row when it has no id, updates it otherwise.
    ///
    /// Returns the row's primary key.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Store`] if the row cannot be written.
    fn save(&self, row: &SubscriptionRow) -> impl Future<Output = Result<i64>> + Send;
}

/// Store keeping rows in memory, per table.
///
/// Useful for tests and prototypes. Can be told to fail the next write to exercise
/// partial-failure paths.
///
/// # Examples
///
/// ```
/// use gu_payment::store::{InMemoryStore, SubscriptionRow, SubscriptionStore};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = InMemoryStore::new();
/// let id = store.save(&SubscriptionRow::new("subscriptions")).await.unwrap();
/// assert!(store.find("subscriptions", id).await.is_some());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<i64, SubscriptionRow>>>,
    fail_next: RwLock<Option<String>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next [`save`](SubscriptionStore::save) fail with `message`.
    pub async fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.write().await = Some(message.into());
    }

    /// Returns a stored row.
    pub async fn find(&self, table: &str, id: i64) -> Option<SubscriptionRow> {
        self.tables.read().await.get(table).and_then(|rows| rows.get(&id)).cloned()
    }

    /// Number of rows stored in `table`.
    pub async fn count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }
}

impl SubscriptionStore for InMemoryStore {
    async fn save(&self, row: &SubscriptionRow) -> Result<i64> {
        if let Some(message) = self.fail_next.write().await.take() {
            return Err(PaymentError::Store(message));
        }

        let mut tables = self.tables.write().await;
        let rows = tables.entry(row.table.clone()).or_default();

        let id = match row.id {
            Some(id) if rows.contains_key(&id) => id,
            Some(id) => {
                return Err(PaymentError::Store(format!(
                    "no row with id {id} in table '{}'",
                    row.table
                )));
            }
            None => rows.last_key_value().map_or(1, |(last, _)| last + 1),
        };

        let mut stored = row.clone();
        stored.id = Some(id);
        rows.insert(id, stored);

        Ok(id)
    }
}

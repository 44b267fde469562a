//! Document store trait and its SQLite implementation.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tokio::sync::broadcast;

use super::document::{Direction, Document, Fields, FilterOp, IndexPolicy, Query};

/// Capacity of the change feed before slow listeners start lagging.
const CHANGE_FEED_CAPACITY: usize = 256;

/// Errors raised by the document store.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// The query needs a composite index that does not exist
    MissingIndex(String),
    /// The caller may not read or write the target
    PermissionDenied(String),
    NotFound { collection: String, id: String },
    Conflict { collection: String, id: String },
    /// A stored document does not fit the expected model
    Decode(String),
    /// Any other backend failure
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::MissingIndex(index) => write!(f, "missing composite index {}", index),
            StoreError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            StoreError::NotFound { collection, id } => write!(f, "{}/{} not found", collection, id),
            StoreError::Conflict { collection, id } => {
                write!(f, "{}/{} already exists", collection, id)
            }
            StoreError::Decode(msg) => write!(f, "decode error: {}", msg),
            StoreError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A write that happened in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// Document database seam. Repositories only ever talk to this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert under a generated id.
    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError>;

    /// Insert under a caller-chosen id; fails with `Conflict` if the id is taken.
    async fn create(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError>;

    /// Write a whole document, or merge into an existing one when `merge` is set.
    async fn set(&self, collection: &str, id: &str, data: Fields, merge: bool)
        -> Result<(), StoreError>;

    /// Merge fields into an existing document; fails with `NotFound` otherwise.
    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        Ok(self.query(query).await?.len() as u64)
    }

    /// Subscribe to every subsequent write.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// SQLite-backed document store.
///
/// Documents live as JSON text in one table; filters and ordering are pushed down with
/// `json_extract`. Multi-field queries are checked against the declared composite indexes
/// first, mirroring the managed store this service was built around.
pub struct SqliteStore {
    pool: SqlitePool,
    indexes: IndexPolicy,
    changes: broadcast::Sender<ChangeEvent>,
}

enum Bind {
    Text(String),
    Int(i64),
    Real(f64),
}

impl Bind {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Bind::Text(s.clone())),
            Value::Bool(b) => Some(Bind::Int(*b as i64)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Bind::Int(i)),
                None => n.as_f64().map(Bind::Real),
            },
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', ""))
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, indexes: IndexPolicy) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            indexes,
            changes,
        }
    }

    fn publish(&self, collection: &str, id: &str, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.changes.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }

    fn build_select(&self, query: &Query, columns: &str) -> (String, Vec<Bind>) {
        let mut sql = format!("SELECT {} FROM documents WHERE collection = ?", columns);
        let mut binds = vec![Bind::Text(query.collection.clone())];

        for filter in &query.filters {
            let path = json_path(&filter.field);
            match (filter.op, &filter.value) {
                (FilterOp::Eq, Value::Null) => {
                    sql.push_str(" AND json_extract(data, ?) IS NULL");
                    binds.push(Bind::Text(path));
                }
                (FilterOp::In, Value::Array(options)) => {
                    let options: Vec<Bind> = options.iter().filter_map(Bind::from_value).collect();
                    if options.is_empty() {
                        sql.push_str(" AND 0");
                        continue;
                    }
                    let marks = vec!["?"; options.len()].join(", ");
                    sql.push_str(&format!(" AND json_extract(data, ?) IN ({})", marks));
                    binds.push(Bind::Text(path));
                    binds.extend(options);
                }
                (op, value) => match Bind::from_value(value) {
                    Some(bind) => {
                        sql.push_str(&format!(" AND json_extract(data, ?) {} ?", op.sql()));
                        binds.push(Bind::Text(path));
                        binds.push(bind);
                    }
                    None => sql.push_str(" AND 0"),
                },
            }
        }

        match &query.order_by {
            Some(order) => {
                let path = json_path(&order.field);
                sql.push_str(" AND json_extract(data, ?) IS NOT NULL");
                binds.push(Bind::Text(path.clone()));

                if let Some(cursor) = &query.start_after {
                    let cmp = match order.direction {
                        Direction::Asc => ">",
                        Direction::Desc => "<",
                    };
                    match Bind::from_value(&cursor.value) {
                        Some(value) => {
                            let again = Bind::from_value(&cursor.value);
                            sql.push_str(&format!(
                                " AND (json_extract(data, ?) {cmp} ? OR (json_extract(data, ?) = ? AND id {cmp} ?))"
                            ));
                            binds.push(Bind::Text(path.clone()));
                            binds.push(value);
                            binds.push(Bind::Text(path.clone()));
                            binds.extend(again);
                            binds.push(Bind::Text(cursor.id.clone()));
                        }
                        // Cursor sits among documents lacking the field; nothing follows it here.
                        None => sql.push_str(" AND 0"),
                    }
                }

                let dir = match order.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                sql.push_str(&format!(" ORDER BY json_extract(data, ?) {dir}, id {dir}"));
                binds.push(Bind::Text(path));
            }
            None => {
                if let Some(cursor) = &query.start_after {
                    sql.push_str(" AND id > ?");
                    binds.push(Bind::Text(cursor.id.clone()));
                }
                sql.push_str(" ORDER BY id ASC");
            }
        }

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Bind::Int(limit as i64));
        }

        (sql, binds)
    }

    async fn fetch_data(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        let row = sqlx::query("SELECT data FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.get("data");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn write_data(&self, collection: &str, id: &str, data: &Fields) -> Result<(), StoreError> {
        let raw = serde_json::to_string(data)?;
        sqlx::query(
            "INSERT INTO documents (collection, id, data) VALUES (?, ?, ?) \
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
        )
        .bind(collection)
        .bind(id)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    binds: Vec<Bind>,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s),
            Bind::Int(i) => query.bind(i),
            Bind::Real(f) => query.bind(f),
        };
    }
    query
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let raw: String = row.get("data");
    Ok(Document::new(row.get::<String, _>("id"), serde_json::from_str(&raw)?))
}

fn merge_into(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .fetch_data(collection, id)
            .await?
            .map(|data| Document::new(id, data)))
    }

    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.create(collection, &id, data).await?;
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, data: Fields) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&data)?;
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, data) VALUES (?, ?, ?) \
             ON CONFLICT(collection, id) DO NOTHING",
        )
        .bind(collection)
        .bind(id)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        self.publish(collection, id, ChangeKind::Created);
        Ok(())
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        let existing = self.fetch_data(collection, id).await?;
        let kind = if existing.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        let merged = match existing {
            Some(mut current) if merge => {
                merge_into(&mut current, data);
                current
            }
            _ => data,
        };
        self.write_data(collection, id, &merged).await?;
        self.publish(collection, id, kind);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), StoreError> {
        let mut current =
            self.fetch_data(collection, id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
        merge_into(&mut current, patch);
        self.write_data(collection, id, &current).await?;
        self.publish(collection, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            self.publish(collection, id, ChangeKind::Deleted);
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.indexes.check(query)?;
        let (sql, binds) = self.build_select(query, "id, data");
        let rows = bind_all(sqlx::query(&sql), binds)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        self.indexes.check(query)?;
        let (select, binds) = self.build_select(query, "id");
        let sql = format!("SELECT COUNT(*) AS n FROM ({})", select);
        let row = bind_all(sqlx::query(&sql), binds)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

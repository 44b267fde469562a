//! Index fallback for queries that may need a composite index.
//!
//! The primary query runs as written. If the store reports a missing index, a reduced
//! query (only the server-side filters, no ordering, no limit) is run instead and the
//! rest of the primary query is evaluated in memory. Both paths return the same shape.

use super::document::{Document, Query};
use super::store::{DocumentStore, StoreError};

/// A primary query plus the filters that may stay server-side when degraded.
#[derive(Debug, Clone)]
pub struct FallbackQuery {
    /// Name used in log lines
    pub label: &'static str,
    pub primary: Query,
    server_side: Vec<String>,
}

impl FallbackQuery {
    pub fn new<S: AsRef<str>>(
        label: &'static str,
        primary: Query,
        server_side: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            label,
            primary,
            server_side: server_side
                .into_iter()
                .map(|f| f.as_ref().to_string())
                .collect(),
        }
    }

    /// The degraded query: kept filters only, unordered, unlimited.
    pub fn reduced(&self) -> Query {
        Query::collection(&self.primary.collection).filters(
            self.primary
                .filters
                .iter()
                .filter(|f| self.server_side.contains(&f.field))
                .cloned(),
        )
    }

    /// Run the primary query, degrading on a missing index.
    ///
    /// Never fails: any error that cannot be recovered is logged and yields an empty list.
    pub async fn execute(&self, store: &dyn DocumentStore) -> Vec<Document> {
        match store.query(&self.primary).await {
            Ok(docs) => {
                tracing::debug!(query = self.label, count = docs.len(), "Primary query path");
                docs
            }
            Err(StoreError::MissingIndex(index)) => {
                tracing::warn!(query = self.label, %index, "Missing index, using fallback query path");
                self.execute_reduced(store).await
            }
            Err(e) => {
                tracing::error!(query = self.label, error = %e, "Query failed");
                Vec::new()
            }
        }
    }

    /// Count matches, degrading the same way as [`FallbackQuery::execute`].
    pub async fn count(&self, store: &dyn DocumentStore) -> u64 {
        match store.count(&self.primary).await {
            Ok(n) => n,
            Err(StoreError::MissingIndex(index)) => {
                tracing::warn!(query = self.label, %index, "Missing index, counting on fallback path");
                self.execute_reduced(store).await.len() as u64
            }
            Err(e) => {
                tracing::error!(query = self.label, error = %e, "Count failed");
                0
            }
        }
    }

    /// Run only the degraded path.
    pub async fn execute_reduced(&self, store: &dyn DocumentStore) -> Vec<Document> {
        match store.query(&self.reduced()).await {
            Ok(docs) => self.primary.apply(docs),
            Err(e) => {
                tracing::error!(query = self.label, error = %e, "Fallback query failed");
                Vec::new()
            }
        }
    }
}

use std::sync::Arc;

use serde_json::json;

use super::object;
use crate::db::{
    collections, decode_all, listen, timestamp_now, Direction, Document, DocumentStore,
    FallbackQuery, Filter, Query, Subscription,
};
use crate::errors::AppError;
use crate::models::{limits, CreateTodoRequest, Todo};

const TODOS: &str = collections::TODOS;

/// Shared to-do list of the admin team.
#[derive(Clone)]
pub struct TodosRepo {
    store: Arc<dyn DocumentStore>,
}

impl TodosRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn open_query() -> FallbackQuery {
        FallbackQuery::new(
            "todos.open",
            Query::collection(TODOS)
                .filter(Filter::eq("done", false))
                .order_by("createdAt", Direction::Desc)
                .limit(limits::PAGE),
            ["done"],
        )
    }

    fn all_query() -> Query {
        Query::collection(TODOS)
            .order_by("createdAt", Direction::Desc)
            .limit(limits::MAX_QUERY)
    }

    pub async fn list(&self, include_done: bool) -> Result<Vec<Todo>, AppError> {
        if include_done {
            Ok(decode_all(&self.store.query(&Self::all_query()).await?))
        } else {
            Ok(decode_all(&Self::open_query().execute(self.store.as_ref()).await))
        }
    }

    /// Follow open items.
    pub fn listen_active<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Todo>) + Send + 'static,
    {
        listen(self.store.clone(), Self::open_query(), move |result| {
            callback(decode_all(&result.unwrap_or_default()))
        })
    }

    /// Follow every item, done or not.
    pub fn listen_all<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Todo>) + Send + 'static,
    {
        listen(self.store.clone(), Self::all_query(), move |result| match result {
            Ok(docs) => callback(decode_all(&docs)),
            Err(e) => {
                tracing::error!(error = %e, "Todo listener failed");
                callback(Vec::new());
            }
        })
    }

    pub async fn add(&self, request: &CreateTodoRequest) -> Result<Todo, AppError> {
        let now = timestamp_now();
        let data = object(json!({
            "text": request.text.trim(),
            "done": false,
            "createdAt": now,
            "updatedAt": now,
        }));
        let id = self.store.add(TODOS, data.clone()).await?;
        Ok(Document::new(id, data).decode()?)
    }

    /// Flip `done`. Concurrent toggles are last-write-wins.
    pub async fn toggle(&self, id: &str) -> Result<Todo, AppError> {
        let doc = self
            .store
            .get(TODOS, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Todo {} not found", id)))?;
        let done = !doc.bool_field("done").unwrap_or(false);

        let patch = object(json!({ "done": done, "updatedAt": timestamp_now() }));
        self.store.update(TODOS, id, patch).await?;
        match self.store.get(TODOS, id).await? {
            Some(doc) => Ok(doc.decode()?),
            None => Err(AppError::NotFound(format!("Todo {} not found", id))),
        }
    }
}

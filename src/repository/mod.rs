//! Repositories over the document store.
//!
//! Every repository holds the same injected store handle; none of them reach for a
//! global. Read paths that need a composite index go through `FallbackQuery`.

mod community;
mod donations;
mod notifications;
mod team;
mod todos;
mod user_stats;
mod users;
mod whitelist;

pub use community::*;
pub use donations::*;
pub use notifications::*;
pub use team::*;
pub use todos::*;
pub use user_stats::*;
pub use users::*;
pub use whitelist::*;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::db::{Cursor, Document, DocumentStore, Fields, Query};

/// All repositories, sharing one store.
#[derive(Clone)]
pub struct Repos {
    pub store: Arc<dyn DocumentStore>,
    pub donations: DonationsRepo,
    pub notifications: NotificationsRepo,
    pub team: TeamRepo,
    pub users: UsersRepo,
    pub community: CommunityRepo,
    pub todos: TodosRepo,
    pub user_stats: UserStatsRepo,
    pub whitelist: WhitelistResolver,
}

impl Repos {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            donations: DonationsRepo::new(store.clone()),
            notifications: NotificationsRepo::new(store.clone()),
            team: TeamRepo::new(store.clone()),
            users: UsersRepo::new(store.clone()),
            community: CommunityRepo::new(store.clone()),
            todos: TodosRepo::new(store.clone()),
            user_stats: UserStatsRepo::new(store.clone()),
            whitelist: WhitelistResolver::new(store.clone()),
            store,
        }
    }
}

/// One page of a cursor-paginated list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Absent when the page came back empty
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// Build a page from raw documents, the cursor pointing at the last one.
    pub fn from_documents(query: &Query, docs: &[Document], decode: impl Fn(&[Document]) -> Vec<T>) -> Self {
        Self {
            items: decode(docs),
            next_cursor: docs.last().map(|doc| query.cursor_for(doc)),
        }
    }
}

/// Turn a `json!` object into a field map; anything else becomes empty.
pub(crate) fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

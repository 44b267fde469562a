//! A live window merged with cursor pages.

use std::collections::HashSet;

use serde_json::Value;

use crate::db::Cursor;
use crate::models::{CommunityPost, Donation, Notification};
use crate::repository::Page;

/// Anything with a stable document id.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for Value {
    fn id(&self) -> &str {
        self.get("id").and_then(Value::as_str).unwrap_or_default()
    }
}

impl Identified for Donation {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Notification {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for CommunityPost {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The most recent items as delivered by a subscription, followed by older pages.
///
/// Items are unique by id. A live item always wins over a paged copy, and paging never
/// removes a live item. Once a page comes back empty, or any fetch or subscription
/// fails, no further page is requested.
#[derive(Debug, Clone)]
pub struct LiveList<T> {
    live: Vec<T>,
    pages: Vec<T>,
    cursor: Option<Cursor>,
    has_more: bool,
    error: Option<String>,
}

impl<T> Default for LiveList<T> {
    fn default() -> Self {
        Self {
            live: Vec::new(),
            pages: Vec::new(),
            cursor: None,
            has_more: true,
            error: None,
        }
    }
}

impl<T: Identified + Clone> LiveList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live window with a fresh snapshot.
    pub fn apply_live(&mut self, items: Vec<T>) {
        self.live = dedup(items);
    }

    /// The subscription failed. Rendered items stay; paging stops.
    pub fn apply_live_error(&mut self, message: impl Into<String>) {
        self.error.get_or_insert_with(|| message.into());
    }

    /// Append a fetched page. The cursor moves only on success.
    pub fn apply_page(&mut self, result: Result<Page<T>, String>) {
        match result {
            Ok(page) => {
                match page.next_cursor {
                    Some(cursor) => self.cursor = Some(cursor),
                    None => self.has_more = false,
                }
                let mut seen: HashSet<String> =
                    self.pages.iter().map(|item| item.id().to_string()).collect();
                for item in page.items {
                    if seen.insert(item.id().to_string()) {
                        self.pages.push(item);
                    }
                }
            }
            Err(message) => self.apply_live_error(message),
        }
    }

    /// A record was just created here: show it on top and allow paging again.
    pub fn note_created(&mut self, item: T) {
        let id = item.id().to_string();
        self.live.retain(|existing| existing.id() != id);
        self.live.insert(0, item);
        self.has_more = true;
    }

    /// Live items in delivery order, then paged items not already live.
    pub fn items(&self) -> Vec<T> {
        let live_ids: HashSet<&str> = self.live.iter().map(Identified::id).collect();
        self.live
            .iter()
            .chain(self.pages.iter().filter(|item| !live_ids.contains(item.id())))
            .cloned()
            .collect()
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn can_load_more(&self) -> bool {
        self.has_more && self.error.is_none()
    }
}

fn dedup<T: Identified>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id().to_string()))
        .collect()
}

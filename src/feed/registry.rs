//! Server-side feed sessions.
//!
//! A session keeps one [`LiveList`] per open list view: a subscription feeds the live
//! window, `load_more` appends the next page. Sessions belong to the user who opened
//! them and are torn down on close or when that user is denied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::LiveList;
use crate::db::{decode_all, listen, Cursor, Document, DocumentStore, ListenPlan, Subscription};
use crate::errors::AppError;
use crate::models::{CommunityPost, Donation, Notification};
use crate::repository::{CommunityRepo, DonationsRepo, NotificationsRepo, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedKind {
    Notifications,
    Donations,
    CommunityPosts,
}

impl FeedKind {
    fn plan(self, limit: usize, cursor: Option<Cursor>) -> ListenPlan {
        match self {
            FeedKind::Notifications => NotificationsRepo::recent_query(limit, cursor).into(),
            FeedKind::Donations => DonationsRepo::recent_query(limit, cursor).into(),
            FeedKind::CommunityPosts => CommunityRepo::posts_query(limit, cursor).into(),
        }
    }

    fn decode(self, docs: &[Document]) -> Vec<Value> {
        match self {
            FeedKind::Notifications => to_values(decode_all::<Notification>(docs)),
            FeedKind::Donations => to_values(
                decode_all::<Donation>(docs)
                    .into_iter()
                    .filter(|d| d.status.is_visible())
                    .collect(),
            ),
            FeedKind::CommunityPosts => to_values(decode_all::<CommunityPost>(docs)),
        }
    }
}

fn to_values<T: Serialize>(items: Vec<T>) -> Vec<Value> {
    items
        .into_iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

/// What a client sees of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub id: String,
    pub kind: FeedKind,
    pub items: Vec<Value>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct FeedSession {
    kind: FeedKind,
    owner: String,
    page_size: usize,
    list: Arc<Mutex<LiveList<Value>>>,
    /// Serializes page fetches of one session
    fetch: tokio::sync::Mutex<()>,
    _subscription: Subscription,
}

impl FeedSession {
    fn snapshot(&self, id: &str) -> FeedSnapshot {
        let list = lock(&self.list);
        FeedSnapshot {
            id: id.to_string(),
            kind: self.kind,
            items: list.items(),
            has_more: list.can_load_more(),
            error: list.error().map(str::to_string),
        }
    }
}

fn lock(list: &Mutex<LiveList<Value>>) -> std::sync::MutexGuard<'_, LiveList<Value>> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FeedRegistry {
    store: Arc<dyn DocumentStore>,
    sessions: RwLock<HashMap<String, Arc<FeedSession>>>,
}

impl FeedRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session. The live window holds the newest `window` items; pages hold `page_size`.
    pub async fn open(
        &self,
        kind: FeedKind,
        owner: &str,
        window: usize,
        page_size: usize,
    ) -> FeedSnapshot {
        let list = Arc::new(Mutex::new(LiveList::new()));

        // First snapshot inline, so the opening response already carries it.
        match fetch(self.store.as_ref(), kind, window, None).await {
            Ok(page) => lock(&list).apply_live(page.items),
            Err(e) => lock(&list).apply_live_error(e),
        }

        let subscription = {
            let list = list.clone();
            listen(self.store.clone(), kind.plan(window, None), move |result| match result {
                Ok(docs) => lock(&list).apply_live(kind.decode(&docs)),
                Err(e) => {
                    tracing::warn!(?kind, error = %e, "Feed subscription failed");
                    lock(&list).apply_live_error(e.to_string());
                }
            })
        };

        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(FeedSession {
            kind,
            owner: owner.to_string(),
            page_size,
            list,
            fetch: tokio::sync::Mutex::new(()),
            _subscription: subscription,
        });
        let snapshot = session.snapshot(&id);
        self.sessions.write().await.insert(id.clone(), session);
        tracing::debug!(feed = %id, ?kind, %owner, "Feed opened");
        snapshot
    }

    async fn session(&self, id: &str, owner: &str) -> Result<Arc<FeedSession>, AppError> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|session| session.owner == owner)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Feed {} not found", id)))
    }

    pub async fn snapshot(&self, id: &str, owner: &str) -> Result<FeedSnapshot, AppError> {
        Ok(self.session(id, owner).await?.snapshot(id))
    }

    /// Fetch the next page unless paging has ended. A fetch already running for the
    /// same session is waited for rather than duplicated.
    pub async fn load_more(&self, id: &str, owner: &str) -> Result<FeedSnapshot, AppError> {
        let session = self.session(id, owner).await?;
        let _fetching = session.fetch.lock().await;

        let (can_load, cursor) = {
            let list = lock(&session.list);
            (list.can_load_more(), list.cursor().cloned())
        };
        if !can_load {
            return Ok(session.snapshot(id));
        }

        let result = fetch(self.store.as_ref(), session.kind, session.page_size, cursor).await;
        lock(&session.list).apply_page(result);
        Ok(session.snapshot(id))
    }

    pub async fn close(&self, id: &str, owner: &str) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(session) if session.owner == owner => {
                sessions.remove(id);
                Ok(())
            }
            _ => Err(AppError::NotFound(format!("Feed {} not found", id))),
        }
    }

    /// Close every session of a user. Returns how many were closed.
    pub async fn close_for(&self, owner: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.owner != owner);
        before - sessions.len()
    }

    /// Put a just-created record on top of every open session of that kind.
    pub async fn note_created<T: Serialize>(&self, kind: FeedKind, item: &T) {
        let Ok(value) = serde_json::to_value(item) else {
            return;
        };
        for session in self.sessions.read().await.values() {
            if session.kind == kind {
                lock(&session.list).note_created(value.clone());
            }
        }
    }
}

async fn fetch(
    store: &dyn DocumentStore,
    kind: FeedKind,
    limit: usize,
    cursor: Option<Cursor>,
) -> Result<Page<Value>, String> {
    match kind.plan(limit, cursor) {
        ListenPlan::Direct(query) => match store.query(&query).await {
            Ok(docs) => Ok(Page::from_documents(&query, &docs, |d| kind.decode(d))),
            Err(e) => {
                tracing::warn!(?kind, error = %e, "Feed page failed");
                Err(e.to_string())
            }
        },
        ListenPlan::Fallback(query) => {
            let docs = query.execute(store).await;
            Ok(Page::from_documents(&query.primary, &docs, |d| kind.decode(d)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{open_store, open_strict_store};
    use crate::feed::Identified;
    use crate::models::{CreateNotificationRequest, NotificationTarget};
    use std::collections::HashSet;

    async fn notify(repo: &NotificationsRepo, title: &str) -> Notification {
        repo.create(&CreateNotificationRequest {
            title: title.to_string(),
            body: "Gövde".to_string(),
            target: NotificationTarget::All,
            scheduled_at: None,
            route: None,
            collapse_key: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_paging_over_live_window_has_no_duplicates() {
        let (_dir, store) = open_store().await;
        let repo = NotificationsRepo::new(store.clone());
        for i in 0..5 {
            notify(&repo, &format!("Duyuru {}", i)).await;
        }

        let feeds = FeedRegistry::new(store);
        let opened = feeds.open(FeedKind::Notifications, "u1", 2, 2).await;
        assert_eq!(opened.items.len(), 2);

        let mut last = opened;
        for _ in 0..5 {
            last = feeds.load_more(&last.id, "u1").await.unwrap();
        }
        assert!(!last.has_more);

        let ids: Vec<&str> = last.items.iter().map(|v| v.id()).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn test_sessions_are_owned() {
        let (_dir, store) = open_strict_store().await;
        let feeds = FeedRegistry::new(store);
        let a = feeds.open(FeedKind::Donations, "u1", 10, 10).await;
        let b = feeds.open(FeedKind::CommunityPosts, "u1", 10, 10).await;
        let c = feeds.open(FeedKind::Donations, "u2", 10, 10).await;

        assert!(matches!(feeds.snapshot(&a.id, "u2").await, Err(AppError::NotFound(_))));
        assert_eq!(feeds.close_for("u1").await, 2);
        assert!(feeds.snapshot(&b.id, "u1").await.is_err());
        assert!(feeds.snapshot(&c.id, "u2").await.is_ok());

        feeds.close(&c.id, "u2").await.unwrap();
        assert!(feeds.close(&c.id, "u2").await.is_err());
    }

    #[tokio::test]
    async fn test_created_record_shows_on_top() {
        let (_dir, store) = open_store().await;
        let repo = NotificationsRepo::new(store.clone());
        let feeds = FeedRegistry::new(store);
        let opened = feeds.open(FeedKind::Notifications, "u1", 5, 5).await;
        assert!(opened.items.is_empty());

        let created = notify(&repo, "Yeni").await;
        feeds.note_created(FeedKind::Notifications, &created).await;

        let snapshot = feeds.snapshot(&opened.id, "u1").await.unwrap();
        assert_eq!(snapshot.items[0].id(), created.id);
    }
}

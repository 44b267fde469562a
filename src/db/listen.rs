//! Live query and document listeners.
//!
//! A listener subscribes to the store's change feed before its first read, delivers a
//! snapshot, and re-reads whenever a write touches its collection. Each listener runs as
//! a spawned task owned by a [`Subscription`]; once the subscription is dropped or
//! unsubscribed no further callback runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;

use super::document::{Document, Query};
use super::fallback::FallbackQuery;
use super::store::{ChangeEvent, DocumentStore, StoreError};

/// What a live listener runs on every change.
#[derive(Debug, Clone)]
pub enum ListenPlan {
    /// Run the query as-is; an error is delivered once and ends the listener.
    Direct(Query),
    /// Degrade to the reduced query on a missing index; failures end with an empty snapshot.
    Fallback(FallbackQuery),
}

impl ListenPlan {
    fn collection(&self) -> &str {
        match self {
            ListenPlan::Direct(query) => &query.collection,
            ListenPlan::Fallback(fallback) => &fallback.primary.collection,
        }
    }
}

impl From<Query> for ListenPlan {
    fn from(query: Query) -> Self {
        ListenPlan::Direct(query)
    }
}

impl From<FallbackQuery> for ListenPlan {
    fn from(query: FallbackQuery) -> Self {
        ListenPlan::Fallback(query)
    }
}

/// Handle of a running listener.
#[derive(Debug)]
pub struct Subscription {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    fn spawn<Fut>(body: impl FnOnce(Arc<AtomicBool>) -> Fut) -> Self
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(body(active.clone()));
        Self { active, handle }
    }

    /// False once torn down or once the listener ended on its own.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.handle.is_finished()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.handle.abort();
    }
}

enum Step<T> {
    /// Deliver and keep listening
    Snapshot(T),
    /// Deliver and stop
    Final(T),
}

/// Listen to a query.
pub fn listen<F>(store: Arc<dyn DocumentStore>, plan: impl Into<ListenPlan>, mut callback: F) -> Subscription
where
    F: FnMut(Result<Vec<Document>, StoreError>) + Send + 'static,
{
    let plan = plan.into();
    let mut changes = store.changes();

    Subscription::spawn(move |active| async move {
        let mut degraded = false;
        loop {
            let step = run_plan(store.as_ref(), &plan, &mut degraded).await;
            if !active.load(Ordering::Acquire) {
                return;
            }
            match step {
                Step::Snapshot(result) => callback(result),
                Step::Final(result) => {
                    callback(result);
                    active.store(false, Ordering::Release);
                    return;
                }
            }

            let collection = plan.collection().to_string();
            if !wait_for_change(&mut changes, |event| event.collection == collection).await {
                return;
            }
        }
    })
}

/// Listen to a single document. Delivers `None` while the document does not exist.
pub fn listen_document<F>(
    store: Arc<dyn DocumentStore>,
    collection: &str,
    id: &str,
    mut callback: F,
) -> Subscription
where
    F: FnMut(Result<Option<Document>, StoreError>) + Send + 'static,
{
    let collection = collection.to_string();
    let id = id.to_string();
    let mut changes = store.changes();

    Subscription::spawn(move |active| async move {
        loop {
            let result = store.get(&collection, &id).await;
            if !active.load(Ordering::Acquire) {
                return;
            }
            let failed = result.is_err();
            callback(result);
            if failed {
                active.store(false, Ordering::Release);
                return;
            }

            let matches = |event: &ChangeEvent| event.collection == collection && event.id == id;
            if !wait_for_change(&mut changes, matches).await {
                return;
            }
        }
    })
}

async fn run_plan(
    store: &dyn DocumentStore,
    plan: &ListenPlan,
    degraded: &mut bool,
) -> Step<Result<Vec<Document>, StoreError>> {
    match plan {
        ListenPlan::Direct(query) => match store.query(query).await {
            Ok(docs) => Step::Snapshot(Ok(docs)),
            Err(e) => {
                tracing::warn!(collection = %query.collection, error = %e, "Listener failed");
                Step::Final(Err(e))
            }
        },
        ListenPlan::Fallback(fallback) => {
            if !*degraded {
                match store.query(&fallback.primary).await {
                    Ok(docs) => return Step::Snapshot(Ok(docs)),
                    Err(StoreError::MissingIndex(index)) => {
                        tracing::warn!(
                            query = fallback.label,
                            %index,
                            "Missing index, re-establishing listener on fallback query"
                        );
                        *degraded = true;
                    }
                    Err(e) => {
                        tracing::error!(query = fallback.label, error = %e, "Listener failed");
                        return Step::Final(Ok(Vec::new()));
                    }
                }
            }
            match store.query(&fallback.reduced()).await {
                Ok(docs) => Step::Snapshot(Ok(fallback.primary.apply(docs))),
                Err(e) => {
                    tracing::error!(query = fallback.label, error = %e, "Fallback listener failed");
                    Step::Final(Ok(Vec::new()))
                }
            }
        }
    }
}

/// Wait for a relevant change, then drain whatever else is already queued.
///
/// Returns false when the change feed is closed.
async fn wait_for_change(
    changes: &mut broadcast::Receiver<ChangeEvent>,
    relevant: impl Fn(&ChangeEvent) -> bool,
) -> bool {
    loop {
        match changes.recv().await {
            Ok(event) if relevant(&event) => break,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Listener lagged behind change feed, re-reading");
                break;
            }
            Err(RecvError::Closed) => return false,
        }
    }
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Closed) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::document::{Direction, Fields, Filter};
    use crate::db::test_support::{fields, open_store, open_strict_store};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("listener timed out")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn test_listen_delivers_snapshots_on_change() {
        let (_dir, store) = open_store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = listen(
            store.clone(),
            Query::collection("todos").order_by("createdAt", Direction::Desc),
            move |result| {
                let _ = tx.send(result.map(|docs| docs.len()));
            },
        );

        assert_eq!(next(&mut rx).await.unwrap(), 0);
        store
            .add("todos", fields(json!({ "text": "a", "createdAt": "2025-01-01T00:00:00.000Z" })))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.unwrap(), 1);
        assert!(sub.is_active());
    }

    #[tokio::test]
    async fn test_no_callback_after_unsubscribe() {
        let (_dir, store) = open_store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = listen(store.clone(), Query::collection("todos"), move |result| {
            let _ = tx.send(result.is_ok());
        });
        assert!(next(&mut rx).await);
        sub.unsubscribe();

        store.add("todos", Fields::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The sender was dropped with the task, so the channel is closed and empty.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_direct_listener_ends_with_error() {
        let (_dir, store) = open_strict_store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let query = Query::collection("donations")
            .filter(Filter::eq("status", "completed"))
            .order_by("createdAt", Direction::Desc);
        let sub = listen(store.clone(), query, move |result| {
            let _ = tx.send(result.is_err());
        });

        assert!(next(&mut rx).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_fallback_listener_degrades() {
        let (_dir, store) = open_strict_store().await;
        store
            .set(
                "donations",
                "d1",
                fields(json!({ "status": "completed", "createdAt": "2025-01-01T00:00:00.000Z" })),
                false,
            )
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let plan = FallbackQuery::new(
            "completed",
            Query::collection("donations")
                .filter(Filter::eq("status", "completed"))
                .order_by("createdAt", Direction::Desc),
            ["status"],
        );
        let _sub = listen(store.clone(), plan, move |result| {
            let _ = tx.send(result.map(|docs| docs.len()));
        });

        assert_eq!(next(&mut rx).await.unwrap(), 1);
        store
            .set(
                "donations",
                "d2",
                fields(json!({ "status": "completed", "createdAt": "2025-01-02T00:00:00.000Z" })),
                false,
            )
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_listen_document() {
        let (_dir, store) = open_store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _sub = listen_document(store.clone(), "donations", "d1", move |result| {
            let _ = tx.send(result.unwrap().map(|doc| doc.id));
        });
        assert_eq!(next(&mut rx).await, None);

        store.set("donations", "d1", Fields::new(), false).await.unwrap();
        assert_eq!(next(&mut rx).await, Some("d1".to_string()));
    }
}

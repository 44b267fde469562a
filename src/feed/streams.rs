//! Live streams by owner.
//!
//! A live view keeps its subscription here instead of inside the response stream, so a
//! denied user's streams can be torn down from the admission middleware. Dropping the
//! subscription drops the callback and with it the sending half of the stream's channel,
//! which ends the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::db::Subscription;

type Streams = HashMap<String, HashMap<u64, Subscription>>;

#[derive(Debug, Default)]
pub struct LiveRegistry {
    next_id: AtomicU64,
    streams: Mutex<Streams>,
}

/// Registration of one stream; dropping it (client gone) removes the subscription.
#[derive(Debug)]
pub struct LiveLease {
    registry: Arc<LiveRegistry>,
    owner: String,
    id: u64,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Streams> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(self: &Arc<Self>, owner: &str, subscription: Subscription) -> LiveLease {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(owner.to_string())
            .or_default()
            .insert(id, subscription);
        tracing::debug!(%owner, stream = id, "Live stream registered");
        LiveLease {
            registry: self.clone(),
            owner: owner.to_string(),
            id,
        }
    }

    /// Tear down every stream of `owner`. Returns how many were closed.
    pub fn close_for(&self, owner: &str) -> usize {
        let removed = self.lock().remove(owner);
        // Subscriptions drop outside the lock
        removed.map_or(0, |streams| streams.len())
    }

    pub fn open_for(&self, owner: &str) -> usize {
        self.lock().get(owner).map_or(0, HashMap::len)
    }

    fn remove(&self, owner: &str, id: u64) {
        let removed = {
            let mut streams = self.lock();
            let removed = streams.get_mut(owner).and_then(|mine| mine.remove(&id));
            if streams.get(owner).is_some_and(HashMap::is_empty) {
                streams.remove(owner);
            }
            removed
        };
        drop(removed);
    }
}

impl Drop for LiveLease {
    fn drop(&mut self) {
        self.registry.remove(&self.owner, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{fields, open_store};
    use crate::db::{listen, DocumentStore, Query};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_close_for_ends_the_owners_streams() {
        let (_dir, store) = open_store().await;
        let store: Arc<dyn DocumentStore> = store;
        let registry = Arc::new(LiveRegistry::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = listen(store.clone(), Query::collection("todos"), move |result| {
            let _ = tx.send(result.map(|docs| docs.len()));
        });
        let _lease = registry.register("u1", subscription);
        let other = registry.register(
            "u2",
            listen(store.clone(), Query::collection("todos"), |_| {}),
        );

        assert_eq!(rx.recv().await.unwrap().unwrap(), 0);
        assert_eq!(registry.close_for("u1"), 1);
        assert_eq!(registry.open_for("u2"), 1);

        // The channel closes once the callback is gone
        store
            .set("todos", "t1", fields(json!({ "text": "x" })), false)
            .await
            .unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(end.is_ok());

        drop(other);
        assert_eq!(registry.open_for("u2"), 0);
    }
}

//! Push notifications. Creating one triggers delivery through the push dispatcher.

use std::sync::Arc;

use serde_json::json;

use super::{object, Page};
use crate::db::{
    collections, decode_all, listen, timestamp_now, Cursor, Direction, Document, DocumentStore,
    Filter, Query, Subscription,
};
use crate::errors::AppError;
use crate::models::{CreateNotificationRequest, Notification, UpdateNotificationRequest};

const NOTIFICATIONS: &str = collections::NOTIFICATIONS;

#[derive(Clone)]
pub struct NotificationsRepo {
    store: Arc<dyn DocumentStore>,
}

impl NotificationsRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Newest first. Single-field ordering, so no composite index is involved.
    pub fn recent_query(limit: usize, cursor: Option<Cursor>) -> Query {
        Query::collection(NOTIFICATIONS)
            .order_by("createdAt", Direction::Desc)
            .limit(limit)
            .start_after(cursor)
    }

    pub async fn create(&self, request: &CreateNotificationRequest) -> Result<Notification, AppError> {
        let now = timestamp_now();
        let data = object(json!({
            "title": request.title.trim(),
            "body": request.body.trim(),
            "target": request.target,
            "scheduledAt": request.scheduled_at,
            "route": request.route.as_deref().map(str::trim).filter(|r| !r.is_empty()),
            "collapseKey": request.collapse_key.as_deref().map(str::trim).filter(|k| !k.is_empty()),
            "createdAt": now,
            "updatedAt": now,
        }));
        let id = self.store.add(NOTIFICATIONS, data.clone()).await?;
        tracing::info!(notification_id = %id, "Notification created");
        Ok(Document::new(id, data).decode()?)
    }

    /// Notifications created at or after `since`, oldest first.
    pub async fn created_since(&self, since: &str) -> Result<Vec<Notification>, AppError> {
        let query = Query::collection(NOTIFICATIONS)
            .filter(Filter::gte("createdAt", since))
            .order_by("createdAt", Direction::Asc);
        Ok(decode_all(&self.store.query(&query).await?))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Notification>, AppError> {
        match self.store.get(NOTIFICATIONS, id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn update(
        &self,
        id: &str,
        request: &UpdateNotificationRequest,
    ) -> Result<Notification, AppError> {
        let mut patch = object(json!({ "updatedAt": timestamp_now() }));
        if let Some(title) = &request.title {
            patch.insert("title".into(), json!(title.trim()));
        }
        if let Some(body) = &request.body {
            patch.insert("body".into(), json!(body.trim()));
        }
        if let Some(target) = &request.target {
            patch.insert("target".into(), json!(target));
        }
        if let Some(scheduled_at) = &request.scheduled_at {
            patch.insert("scheduledAt".into(), json!(scheduled_at));
        }
        self.store.update(NOTIFICATIONS, id, patch).await?;
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }

    /// Hard delete.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        if self.store.get(NOTIFICATIONS, id).await?.is_none() {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }
        self.store.delete(NOTIFICATIONS, id).await?;
        Ok(())
    }

    pub async fn fetch_page(
        &self,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page<Notification>, AppError> {
        let query = Self::recent_query(limit, cursor);
        let docs = self.store.query(&query).await?;
        Ok(Page::from_documents(&query, &docs, decode_all))
    }

    /// Follow the newest notifications. A failing listener delivers an empty list.
    pub fn listen_recent<F>(&self, limit: usize, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Notification>) + Send + 'static,
    {
        listen(self.store.clone(), Self::recent_query(limit, None), move |result| {
            match result {
                Ok(docs) => callback(decode_all(&docs)),
                Err(e) => {
                    tracing::error!(error = %e, "Notification listener failed");
                    callback(Vec::new());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_store;
    use crate::models::NotificationTarget;

    fn request(title: &str) -> CreateNotificationRequest {
        CreateNotificationRequest {
            title: title.to_string(),
            body: "Yeni kampanyamız başladı".to_string(),
            target: NotificationTarget::All,
            scheduled_at: None,
            route: Some(" /donations ".to_string()),
            collapse_key: None,
        }
    }

    #[tokio::test]
    async fn test_pages_follow_cursor_until_exhausted() {
        let (_dir, store) = open_store().await;
        let repo = NotificationsRepo::new(store);
        for i in 0..5 {
            repo.create(&request(&format!("Duyuru {}", i))).await.unwrap();
        }

        let first = repo.fetch_page(2, None).await.unwrap();
        let second = repo.fetch_page(2, first.next_cursor.clone()).await.unwrap();
        let third = repo.fetch_page(2, second.next_cursor.clone()).await.unwrap();
        let fourth = repo.fetch_page(2, third.next_cursor.clone()).await.unwrap();

        assert_eq!(first.items.len(), 2);
        assert_eq!(second.items.len(), 2);
        assert_eq!(third.items.len(), 1);
        assert!(fourth.items.is_empty());
        assert!(fourth.next_cursor.is_none());

        let mut ids: Vec<String> = [first, second, third]
            .into_iter()
            .flat_map(|p| p.items.into_iter().map(|n| n.id))
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (_dir, store) = open_store().await;
        let repo = NotificationsRepo::new(store);
        let created = repo.create(&request("Merhaba")).await.unwrap();
        assert_eq!(created.route.as_deref(), Some("/donations"));

        let update = UpdateNotificationRequest {
            title: Some("  Güncel  ".to_string()),
            ..Default::default()
        };
        let updated = repo.update(&created.id, &update).await.unwrap();
        assert_eq!(updated.title, "Güncel");

        repo.delete(&created.id).await.unwrap();
        assert!(repo.get(&created.id).await.unwrap().is_none());
        assert!(matches!(repo.delete(&created.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            repo.update(&created.id, &update).await,
            Err(AppError::NotFound(_))
        ));
    }
}

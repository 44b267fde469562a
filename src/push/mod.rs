//! Push delivery of newly created notifications.
//!
//! The dispatcher follows the store's change feed. Every notification created is fanned
//! out to each device token found on user profiles, through a [`PushGateway`]. When the
//! dispatcher falls behind the feed it re-reads recent notifications instead of losing them.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::db::{collections, timestamp_now, ChangeEvent, ChangeKind};
use crate::errors::AppError;
use crate::models::Notification;
use crate::repository::{NotificationsRepo, UsersRepo};

pub const DEFAULT_TITLE: &str = "Beraber";
pub const DEFAULT_ROUTE: &str = "/home";

/// One message to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub route: String,
    pub notification_id: String,
    /// A newer message with the same key replaces the older one on the device
    pub collapse_key: String,
}

impl PushMessage {
    /// Messages for every token, with defaults filled in.
    pub fn fan_out(notification: &Notification, tokens: &[String]) -> Vec<PushMessage> {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let title = Some(notification.title.trim())
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string();
        let route = non_empty(&notification.route).unwrap_or_else(|| DEFAULT_ROUTE.to_string());
        let collapse_key = non_empty(&notification.collapse_key)
            .unwrap_or_else(|| format!("notif-{}", notification.id));

        tokens
            .iter()
            .map(|token| PushMessage {
                token: token.clone(),
                title: title.clone(),
                body: notification.body.clone(),
                route: route.clone(),
                notification_id: notification.id.clone(),
                collapse_key: collapse_key.clone(),
            })
            .collect()
    }
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), AppError>;
}

/// Gateway that only logs. Used when no delivery service is wired in.
pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), AppError> {
        tracing::info!(
            notification_id = %message.notification_id,
            collapse_key = %message.collapse_key,
            route = %message.route,
            "Push message"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PushDispatcher {
    notifications: NotificationsRepo,
    users: UsersRepo,
    gateway: Arc<dyn PushGateway>,
}

impl PushDispatcher {
    pub fn new(notifications: NotificationsRepo, users: UsersRepo, gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            notifications,
            users,
            gateway,
        }
    }

    async fn deliver(&self, notification: &Notification) -> Result<DispatchReport, AppError> {
        let notification_id = &notification.id;
        let tokens = self.users.all_push_tokens().await?;
        if tokens.is_empty() {
            tracing::info!(%notification_id, "No push tokens found");
            return Ok(DispatchReport::default());
        }

        let mut report = DispatchReport::default();
        for message in PushMessage::fan_out(notification, &tokens) {
            match self.gateway.send(&message).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(%notification_id, error = %e, "Push delivery failed");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(%notification_id, sent = report.sent, failed = report.failed, "Push sent");
        Ok(report)
    }

    /// Deliver unless already delivered, then record it.
    async fn deliver_once(&self, notification: &Notification, log: &mut DeliveryLog) {
        if log.contains(&notification.id) {
            return;
        }
        if let Err(e) = self.deliver(notification).await {
            tracing::error!(notification_id = %notification.id, error = %e, "Push dispatch failed");
        }
        log.record(notification);
    }

    /// Deliver everything created since the log's watermark that was not delivered yet.
    async fn catch_up(&self, log: &mut DeliveryLog) {
        let since = log.rescan_from();
        match self.notifications.created_since(&since).await {
            Ok(missed) => {
                tracing::info!(%since, candidates = missed.len(), "Push dispatcher catching up");
                for notification in &missed {
                    self.deliver_once(notification, log).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "Push catch-up failed"),
        }
    }

    /// Dispatch every notification created from now on.
    pub fn spawn(self, mut changes: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
        let mut log = DeliveryLog::new(timestamp_now());
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) if is_new_notification(&event) => {
                        match self.notifications.get(&event.id).await {
                            Ok(Some(notification)) => self.deliver_once(&notification, &mut log).await,
                            Ok(None) => {}
                            Err(e) => {
                                tracing::error!(notification_id = %event.id, error = %e, "Push dispatch failed")
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Push dispatcher lagged behind the change feed");
                        self.catch_up(&mut log).await;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

/// How far back a catch-up reads before the watermark, for creations committed out of order.
const RESCAN_MARGIN_SECS: i64 = 5;
/// Delivered ids remembered to keep a catch-up from sending twice.
const DELIVERED_CAPACITY: usize = 1024;

/// What the dispatcher has delivered: the newest creation time and the latest ids.
#[derive(Debug)]
struct DeliveryLog {
    watermark: String,
    order: VecDeque<String>,
    delivered: HashSet<String>,
}

impl DeliveryLog {
    fn new(watermark: String) -> Self {
        Self {
            watermark,
            order: VecDeque::new(),
            delivered: HashSet::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.delivered.contains(id)
    }

    fn record(&mut self, notification: &Notification) {
        if let Some(created_at) = &notification.created_at {
            if *created_at > self.watermark {
                self.watermark = created_at.clone();
            }
        }
        if self.delivered.insert(notification.id.clone()) {
            self.order.push_back(notification.id.clone());
        }
        while self.order.len() > DELIVERED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.delivered.remove(&oldest);
            }
        }
    }

    fn rescan_from(&self) -> String {
        DateTime::parse_from_rfc3339(&self.watermark)
            .map(|at| {
                (at.with_timezone(&Utc) - Duration::seconds(RESCAN_MARGIN_SECS))
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            })
            .unwrap_or_else(|_| self.watermark.clone())
    }
}

fn is_new_notification(event: &ChangeEvent) -> bool {
    event.collection == collections::NOTIFICATIONS && event.kind == ChangeKind::Created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{fields, open_store};
    use crate::db::DocumentStore;
    use crate::models::{CreateNotificationRequest, NotificationTarget};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        async fn send(&self, message: &PushMessage) -> Result<(), AppError> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    fn notification(route: Option<&str>, collapse_key: Option<&str>) -> Notification {
        Notification {
            id: "n1".into(),
            title: "  ".into(),
            body: "Gövde".into(),
            target: Some(NotificationTarget::All),
            scheduled_at: None,
            route: route.map(str::to_string),
            collapse_key: collapse_key.map(str::to_string),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_fan_out_defaults() {
        let messages = PushMessage::fan_out(&notification(None, None), &["t1".into(), "t2".into()]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].title, DEFAULT_TITLE);
        assert_eq!(messages[0].route, DEFAULT_ROUTE);
        assert_eq!(messages[0].collapse_key, "notif-n1");
        assert_eq!(messages[1].token, "t2");

        let custom = PushMessage::fan_out(&notification(Some("/donations"), Some("camp-7")), &["t".into()]);
        assert_eq!(custom[0].route, "/donations");
        assert_eq!(custom[0].collapse_key, "camp-7");
    }

    #[tokio::test]
    async fn test_created_notification_is_delivered() {
        let (_dir, store) = open_store().await;
        store
            .set(
                collections::USERS,
                "u1",
                fields(json!({ "fcmTokens": ["tok-a", "tok-b", ""] })),
                false,
            )
            .await
            .unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let notifications = NotificationsRepo::new(store.clone());
        let dispatcher = PushDispatcher::new(notifications.clone(), UsersRepo::new(store.clone()), gateway.clone());
        let handle = dispatcher.spawn(store.changes());

        let created = notifications
            .create(&CreateNotificationRequest {
                title: "Kampanya".into(),
                body: "Başladı".into(),
                target: NotificationTarget::All,
                scheduled_at: None,
                route: None,
                collapse_key: None,
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if gateway.sent.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = gateway.sent.lock().await.clone();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.notification_id == created.id));
        handle.abort();
    }

    #[tokio::test]
    async fn test_lagged_dispatcher_catches_up_without_duplicates() {
        let (_dir, store) = open_store().await;
        store
            .set(collections::USERS, "u1", fields(json!({ "fcmTokens": ["tok-a"] })), false)
            .await
            .unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let notifications = NotificationsRepo::new(store.clone());
        // A feed with room for one event only
        let (feed, changes) = broadcast::channel(1);
        let handle = PushDispatcher::new(notifications.clone(), UsersRepo::new(store.clone()), gateway.clone())
            .spawn(changes);

        let mut ids = Vec::new();
        for title in ["Bir", "İki", "Üç"] {
            let created = notifications
                .create(&CreateNotificationRequest {
                    title: title.into(),
                    body: "Gövde".into(),
                    target: NotificationTarget::All,
                    scheduled_at: None,
                    route: None,
                    collapse_key: None,
                })
                .await
                .unwrap();
            ids.push(created.id);
        }
        // Sent back to back, so the dispatcher misses the first two
        for id in &ids {
            let _ = feed.send(ChangeEvent {
                collection: collections::NOTIFICATIONS.to_string(),
                id: id.clone(),
                kind: ChangeKind::Created,
            });
        }

        for _ in 0..100 {
            if gateway.sent.lock().await.len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut delivered: Vec<String> = gateway
            .sent
            .lock()
            .await
            .iter()
            .map(|m| m.notification_id.clone())
            .collect();
        delivered.sort();
        ids.sort();
        assert_eq!(delivered, ids);
        handle.abort();
    }

    #[test]
    fn test_delivery_log_rescans_before_watermark() {
        let mut log = DeliveryLog::new("2025-03-01T10:00:00.000Z".into());
        assert_eq!(log.rescan_from(), "2025-03-01T09:59:55.000Z");

        let mut n = notification(None, None);
        n.created_at = Some("2025-03-01T11:00:00.000Z".into());
        log.record(&n);
        assert!(log.contains("n1"));
        assert_eq!(log.watermark, "2025-03-01T11:00:00.000Z");
    }
}

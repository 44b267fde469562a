//! Notification API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{parse_cursor, success, ApiResult};
use crate::errors::AppError;
use crate::feed::FeedKind;
use crate::models::{limits, CreateNotificationRequest, Notification, UpdateNotificationRequest};
use crate::repository::Page;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// GET /api/notifications - One page, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Page<Notification>> {
    let limit = limits::clamp(params.limit, limits::PAGE);
    let cursor = parse_cursor(params.cursor.as_deref())?;
    success(state.repos.notifications.fetch_page(limit, cursor).await?)
}

/// POST /api/notifications - Create; delivery follows through the push dispatcher.
pub async fn create_notification(
    State(state): State<AppState>,
    Json(request): Json<CreateNotificationRequest>,
) -> ApiResult<Notification> {
    request.validate()?;
    let notification = state.repos.notifications.create(&request).await?;
    state
        .feeds
        .note_created(FeedKind::Notifications, &notification)
        .await;
    success(notification)
}

/// GET /api/notifications/{id}
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Notification> {
    match state.repos.notifications.get(&id).await? {
        Some(notification) => success(notification),
        None => Err(AppError::NotFound(format!("Notification {} not found", id))),
    }
}

/// PUT /api/notifications/{id}
pub async fn update_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateNotificationRequest>,
) -> ApiResult<Notification> {
    request.validate()?;
    success(state.repos.notifications.update(&id, &request).await?)
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.repos.notifications.delete(&id).await?;
    success(())
}

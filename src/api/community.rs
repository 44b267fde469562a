//! Community posts and highlights API endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use super::{success, ApiResult, LimitParams};
use crate::auth::Credential;
use crate::feed::FeedKind;
use crate::models::{
    limits, CommunityPost, CreateHighlightRequest, CreatePostRequest, Highlight,
    UpdateHighlightRequest, UpdatePostRequest,
};
use crate::repository::normalize_email;
use crate::AppState;

/// GET /api/community/posts
pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<CommunityPost>> {
    let limit = limits::clamp(params.limit, limits::PAGE);
    success(state.repos.community.list_posts(limit).await)
}

/// POST /api/community/posts
pub async fn create_post(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<CommunityPost> {
    request.validate()?;
    let email_lower = credential.email.as_deref().map(normalize_email);
    let post = state
        .repos
        .community
        .add_post(&request, &credential.uid, email_lower.as_deref())
        .await?;
    state.feeds.note_created(FeedKind::CommunityPosts, &post).await;
    success(post)
}

/// PUT /api/community/posts/{id}
pub async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePostRequest>,
) -> ApiResult<CommunityPost> {
    request.validate()?;
    success(state.repos.community.update_post(&id, &request).await?)
}

/// DELETE /api/community/posts/{id}
pub async fn delete_post(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repos.community.delete_post(&id).await?;
    success(())
}

/// GET /api/community/highlights - Most recently touched first.
pub async fn list_highlights(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<Highlight>> {
    let limit = limits::clamp(params.limit, limits::RECENT);
    success(state.repos.community.list_highlights(limit).await?)
}

/// POST /api/community/highlights
pub async fn create_highlight(
    State(state): State<AppState>,
    Json(request): Json<CreateHighlightRequest>,
) -> ApiResult<Highlight> {
    request.validate()?;
    success(state.repos.community.add_highlight(&request).await?)
}

/// PUT /api/community/highlights/{id} - `id` may also be a month key.
pub async fn update_highlight(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateHighlightRequest>,
) -> ApiResult<Highlight> {
    request.validate()?;
    success(state.repos.community.update_highlight(&id, &request).await?)
}

/// DELETE /api/community/highlights/{id}
pub async fn delete_highlight(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repos.community.delete_highlight(&id).await?;
    success(())
}

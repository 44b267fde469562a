//! Feed session endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::auth::Credential;
use crate::feed::{FeedKind, FeedSnapshot};
use crate::models::limits;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFeedRequest {
    pub kind: FeedKind,
    /// Size of the live window
    pub limit: Option<usize>,
    pub page_size: Option<usize>,
}

/// POST /api/feeds - Open a feed owned by the caller.
pub async fn open_feed(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Json(request): Json<OpenFeedRequest>,
) -> ApiResult<FeedSnapshot> {
    let window = limits::clamp(request.limit, limits::RECENT);
    let page_size = limits::clamp(request.page_size, limits::PAGE);
    success(
        state
            .feeds
            .open(request.kind, &credential.uid, window, page_size)
            .await,
    )
}

/// GET /api/feeds/{id}
pub async fn get_feed(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(id): Path<String>,
) -> ApiResult<FeedSnapshot> {
    success(state.feeds.snapshot(&id, &credential.uid).await?)
}

/// POST /api/feeds/{id}/more - Fetch the next page.
pub async fn load_more_feed(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(id): Path<String>,
) -> ApiResult<FeedSnapshot> {
    success(state.feeds.load_more(&id, &credential.uid).await?)
}

/// DELETE /api/feeds/{id}
pub async fn close_feed(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.feeds.close(&id, &credential.uid).await?;
    success(())
}

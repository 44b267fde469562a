//! Donation API endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use super::{success, ApiResult, LimitParams};
use crate::auth::Credential;
use crate::feed::FeedKind;
use crate::models::{
    limits, validate_photo_url, CampaignOption, CreateDonationRequest, Donation, DonationSummary,
    SetPhotoRequest, UpdateDonationRequest,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

/// GET /api/donations - Most recent visible donations.
pub async fn list_donations(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<Donation>> {
    let limit = limits::clamp(params.limit, limits::RECENT);
    let page = state.repos.donations.fetch_page(limit, None).await?;
    success(page.items)
}

/// POST /api/donations - Create a campaign.
pub async fn create_donation(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Json(request): Json<CreateDonationRequest>,
) -> ApiResult<Donation> {
    let category = request.validate()?;
    let donation = state
        .repos
        .donations
        .add(&request, category, &credential.uid)
        .await?;
    state.feeds.note_created(FeedKind::Donations, &donation).await;
    success(donation)
}

/// GET /api/donations/search - Name prefix search.
pub async fn search_donations(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<DonationSummary>> {
    let limit = limits::clamp(params.limit, limits::RECENT);
    success(state.repos.donations.search_by_name(&params.q, limit).await)
}

/// GET /api/donations/completed
pub async fn list_completed(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<DonationSummary>> {
    let limit = limits::clamp(params.limit, limits::RECENT);
    success(state.repos.donations.fetch_completed(limit).await)
}

/// GET /api/donations/photo-pending
pub async fn list_photo_pending(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<DonationSummary>> {
    let limit = limits::clamp(params.limit, limits::PAGE);
    success(state.repos.donations.fetch_photo_pending(limit).await)
}

/// GET /api/donations/campaign-options
pub async fn campaign_options(State(state): State<AppState>) -> ApiResult<Vec<CampaignOption>> {
    success(state.repos.donations.campaign_options().await?)
}

/// GET /api/donations/{id} - Missing and deleted donations read as `null`.
pub async fn get_donation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Option<Donation>> {
    success(state.repos.donations.get_by_id(&id).await?)
}

/// PUT /api/donations/{id}
pub async fn update_donation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDonationRequest>,
) -> ApiResult<Donation> {
    let category = request.validate()?;
    success(state.repos.donations.update(&id, &request, category).await?)
}

/// DELETE /api/donations/{id} - Soft delete.
pub async fn delete_donation(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repos.donations.delete(&id).await?;
    success(())
}

/// PUT /api/donations/{id}/photo - Attach a photo.
pub async fn set_donation_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetPhotoRequest>,
) -> ApiResult<Donation> {
    validate_photo_url(&request.url)?;
    success(state.repos.donations.set_photo_url(&id, request.url.trim()).await?)
}

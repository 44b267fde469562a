//! Maintenance endpoints for trusted processes, behind the pre-shared key.
//!
//! These cover account provisioning, claims management, data migrations and the
//! progress reports of the donation aggregation job.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::auth::{ClaimsSyncReport, CredentialClaims, IssuedToken};
use crate::errors::AppError;
use crate::models::{Donation, ProgressReport, UpdateUserStatsRequest, UpsertProfileRequest, UserProfile, UserStats};
use crate::repository::{BackfillReport, NormalizeReport};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    /// Existing account to sign for; looked up or created by email when absent
    #[serde(default)]
    pub uid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(flatten)]
    pub token: IssuedToken,
    pub account_created: bool,
}

/// POST /api/maintenance/tokens - Issue a credential for an account.
pub async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<TokenResponse> {
    let email = request.email.trim();
    if !email.contains('@') {
        return Err(AppError::Validation(format!("Invalid email: {}", email)));
    }
    let (uid, account_created) = match request.uid {
        Some(uid) => (uid, false),
        None => state.identity.ensure_account(email).await?,
    };
    let token = state.identity.issue_token(&uid, Some(email))?;
    success(TokenResponse {
        token,
        account_created,
    })
}

/// PUT /api/maintenance/claims/{uid}
pub async fn set_claims(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(claims): Json<CredentialClaims>,
) -> ApiResult<CredentialClaims> {
    state.identity.set_claims(&uid, claims).await?;
    success(claims)
}

/// POST /api/maintenance/claims/sync - Mirror the team directory into claims.
pub async fn sync_claims(State(state): State<AppState>) -> ApiResult<ClaimsSyncReport> {
    let members = state.repos.team.list_all().await?;
    success(state.identity.sync_from_directory(&members).await?)
}

/// POST /api/maintenance/team/normalize
pub async fn normalize_team(State(state): State<AppState>) -> ApiResult<NormalizeReport> {
    success(state.repos.team.normalize_all().await?)
}

/// POST /api/maintenance/highlights/backfill
pub async fn backfill_highlights(State(state): State<AppState>) -> ApiResult<BackfillReport> {
    success(state.repos.community.backfill_highlights().await?)
}

/// POST /api/maintenance/donations/{id}/progress
pub async fn report_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<ProgressReport>,
) -> ApiResult<Donation> {
    success(state.repos.donations.record_progress(&id, report.collected).await?)
}

/// PUT /api/maintenance/users/{uid}
pub async fn upsert_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<UpsertProfileRequest>,
) -> ApiResult<UserProfile> {
    success(state.repos.users.upsert_profile(&uid, &request).await?)
}

/// PUT /api/maintenance/user-stats
pub async fn update_user_stats(
    State(state): State<AppState>,
    Json(request): Json<UpdateUserStatsRequest>,
) -> ApiResult<UserStats> {
    success(state.repos.user_stats.update(&request).await?)
}

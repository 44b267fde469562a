//! Team directory API endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use super::{success, ApiResult, LimitParams};
use crate::auth::Credential;
use crate::models::{limits, CreateMemberRequest, TeamMember, UpdateMemberRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    #[serde(default)]
    pub email: String,
}

/// GET /api/team - Active members.
pub async fn list_team(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<TeamMember>> {
    let limit = limits::clamp(params.limit, limits::TEAM_LIST);
    success(state.repos.team.list_active(limit).await)
}

/// POST /api/team - Add a member keyed by normalized email.
pub async fn create_team_member(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Json(request): Json<CreateMemberRequest>,
) -> ApiResult<TeamMember> {
    request.validate()?;
    success(state.repos.team.add(&request, Some(&credential.uid)).await?)
}

/// GET /api/team/lookup - Resolve an email against the directory.
pub async fn lookup_team_member(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> ApiResult<Option<TeamMember>> {
    success(state.repos.whitelist.resolve(&params.email).await)
}

/// PUT /api/team/{id}
pub async fn update_team_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateMemberRequest>,
) -> ApiResult<TeamMember> {
    request.validate()?;
    success(state.repos.team.update(&id, &request).await?)
}

/// DELETE /api/team/{id}
pub async fn delete_team_member(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repos.team.delete(&id).await?;
    success(())
}

//! REST API module.
//!
//! Handlers are thin: they validate the request, call a repository and wrap the result
//! in the JSON envelope.

mod community;
mod donations;
mod feeds;
mod live;
mod maintenance;
mod notifications;
mod reports;
mod session;
mod team;
mod todos;

pub use community::*;
pub use donations::*;
pub use feeds::*;
pub use live::*;
pub use maintenance::*;
pub use notifications::*;
pub use reports::*;
pub use session::*;
pub use team::*;
pub use todos::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::Cursor;
use crate::errors::AppError;

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// `?limit=` on list routes.
#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// Decode a `?cursor=` parameter, the JSON form of a [`Cursor`] returned by a previous page.
pub fn parse_cursor(raw: Option<&str>) -> Result<Option<Cursor>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("Invalid cursor: {}", e))),
        None => Ok(None),
    }
}

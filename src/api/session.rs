use axum::Extension;
use serde::Serialize;

use super::{success, ApiResult};
use crate::auth::{Credential, Decision};

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub uid: String,
    pub email: Option<String>,
    pub decision: Decision,
}

/// GET /api/session - Who the caller is. Reaching this handler means admission was granted.
pub async fn get_session(
    Extension(credential): Extension<Credential>,
    Extension(decision): Extension<Decision>,
) -> ApiResult<SessionInfo> {
    success(SessionInfo {
        uid: credential.uid,
        email: credential.email,
        decision,
    })
}

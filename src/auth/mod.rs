//! Authentication and admission.
//!
//! Two layers guard the API. Maintenance routes take a pre-shared key compared in
//! constant time to mitigate timing attacks. Every other `/api` route takes a bearer
//! credential and runs the admission decision on each request.

mod decision;
mod guard;
mod identity;

pub use decision::*;
pub use guard::*;
pub use identity::*;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::errors::{codes, AppError, ErrorDetails, ErrorResponse};
use crate::AppState;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // If no PSK is configured, allow all requests (dev mode)
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| bearer_token(&request).map(str::to_string));

    match provided {
        Some(key) if constant_time_compare(&key, &expected) => next.run(request).await,
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing or invalid API key"),
    }
}

/// Admission middleware for the admin routes.
///
/// On a grant the verified [`Credential`] and the [`Decision`] are attached as request
/// extensions. On a denial the credential is revoked, the user's feeds and live streams
/// are closed, and the client is pointed at the login page.
pub async fn require_admission(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&request).map(str::to_string) else {
        return AppError::Unauthorized("Missing credential".to_string()).into_response();
    };

    let credential = match state.identity.verify(&token).await {
        Ok(credential) => credential,
        Err(e) => {
            tracing::debug!(error = %e, "Credential rejected");
            return e.into_response();
        }
    };

    let settled = state
        .guards
        .admit(&credential.uid, state.gatekeeper.evaluate(Some(&credential)))
        .await;

    match settled.decision {
        Decision::Granted => {
            request.extensions_mut().insert(settled.decision);
            request.extensions_mut().insert(credential);
            next.run(request).await
        }
        Decision::Denied | Decision::Pending => {
            if settled.current {
                state.identity.sign_out(&credential).await;
                let closed_feeds = state.feeds.close_for(&credential.uid).await;
                let closed_streams = state.live.close_for(&credential.uid);
                tracing::info!(
                    uid = %credential.uid,
                    closed_feeds,
                    closed_streams,
                    "Signed out after denied admission"
                );
            }
            AppError::Unauthorized("Not authorized for the admin panel".to_string()).into_response()
        }
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Rejection of the maintenance layer. No login redirect: the caller is a process.
fn unauthorized_response(message: &str) -> Response {
    let body = ErrorResponse {
        success: false,
        error: ErrorDetails {
            code: codes::UNAUTHORIZED.to_string(),
            message: message.to_string(),
            details: None,
        },
    };

    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use storefront_core::domain::AuthUser;
use storefront_core::ports::{PortError, PortResult};

use crate::web::cookies::{read_cookie, SESSION_COOKIE};
use crate::web::errors::{reject, HandlerError};
use crate::web::state::AppState;

/// Middleware that validates the auth session cookie.
///
/// If valid, inserts the `AuthUser` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HandlerError> {
    let user = authenticate(&state, req.headers())
        .await
        .map_err(reject)?
        .ok_or((StatusCode::UNAUTHORIZED, "Authentication required".to_string()))?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Like [`require_auth`], but lets anonymous requests through.
///
/// Always inserts an `Option<AuthUser>` into request extensions.
pub async fn resolve_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HandlerError> {
    let user = authenticate(&state, req.headers()).await.map_err(reject)?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// `Ok(None)` when there is no session cookie or the session is unknown or expired.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> PortResult<Option<AuthUser>> {
    let Some(auth_session_id) = read_cookie(headers, SESSION_COOKIE) else {
        return Ok(None);
    };

    match state.accounts.validate_auth_session(auth_session_id).await {
        Ok(user) => Ok(Some(user)),
        Err(PortError::Unauthorized) | Err(PortError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

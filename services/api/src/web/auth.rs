//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout, the signed-in
//! user's account endpoints, plus the role guard used by the seller and admin
//! endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_core::domain::{AuthUser, NewUser, Role, User, UserUpdate};
use storefront_core::ports::PortError;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::cookies::{build_cookie, read_cookie, SESSION_COOKIE};
use crate::web::errors::{bad_json, reject, HandlerError};
use crate::web::state::AppState;

const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// `client` (default) or `seller`.
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Every field is optional; at least one must be present.
#[derive(Deserialize)]
pub struct UpdateAccountRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: &'static str,
}

impl From<User> for AuthResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            email: user.email,
            role: user.role.as_str(),
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    let Json(req) = payload.map_err(bad_json)?;

    // 1. Validate the request
    let username = req.username.trim();
    let email = req.email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() {
        return Err(reject(PortError::InvalidArgument(
            "username and email are required".to_string(),
        )));
    }
    check_password(&req.password)?;
    let role = match req.role.as_deref() {
        None => Role::Client,
        Some(raw) => match raw.parse::<Role>().map_err(reject)? {
            Role::Admin => {
                return Err(reject(PortError::InvalidArgument(
                    "role must be client or seller".to_string(),
                )))
            }
            role => role,
        },
    };

    // 2. Hash the password
    let password_hash = hash_password(&req.password)?;

    // 3. Create the user
    let user = state
        .accounts
        .create_user(NewUser {
            username: username.to_string(),
            email,
            hashed_password: password_hash,
            role,
        })
        .await
        .map_err(email_taken)?;
    info!(user_id = %user.id, role = user.role.as_str(), "user signed up");

    // 4. Start a session
    let cookie = start_session(&state, user.id).await?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(user)),
    ))
}

/// POST /auth/login - Login with existing account
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    let Json(req) = payload.map_err(bad_json)?;
    let invalid = || (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string());

    // 1. Get user by email
    let user_creds = state
        .accounts
        .get_user_by_email(&req.email.trim().to_lowercase())
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => invalid(),
            other => reject(other),
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
    })?;

    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !valid {
        return Err(invalid());
    }

    // 3. Start a session
    let cookie = start_session(&state, user_creds.id).await?;

    let response = AuthResponse {
        user_id: user_creds.id,
        username: user_creds.username,
        email: user_creds.email,
        role: user_creds.role.as_str(),
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/logout - Logout and invalidate session
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let auth_session_id = read_cookie(&headers, SESSION_COOKIE)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state
        .accounts
        .delete_auth_session(auth_session_id)
        .await
        .map_err(reject)?;

    let cookie = build_cookie(SESSION_COOKIE, "", 0, state.config.secure_cookies);

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}

/// GET /auth/me - The signed-in user's account
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, HandlerError> {
    let account = state.accounts.get_user(user.id).await.map_err(reject)?;
    Ok(Json(AuthResponse::from(account)))
}

/// PUT /auth/me - Change username, email or password
pub async fn update_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    let Json(req) = payload.map_err(bad_json)?;

    let username = req.username.map(|u| u.trim().to_string());
    let email = req.email.map(|e| e.trim().to_lowercase());
    if username.as_deref() == Some("") || email.as_deref() == Some("") {
        return Err(reject(PortError::InvalidArgument(
            "username and email must not be empty".to_string(),
        )));
    }
    let hashed_password = match req.password {
        Some(password) => {
            check_password(&password)?;
            Some(hash_password(&password)?)
        }
        None => None,
    };

    let update = UserUpdate {
        username,
        email,
        hashed_password,
    };
    if update.is_empty() {
        return Err(reject(PortError::InvalidArgument(
            "nothing to update".to_string(),
        )));
    }

    let account = state
        .accounts
        .update_user(user.id, update)
        .await
        .map_err(email_taken)?;
    info!(user_id = %user.id, "account updated");

    Ok(Json(AuthResponse::from(account)))
}

/// DELETE /auth/me - Close the account and end every session
///
/// The user's cart goes with it and their listed products leave the catalog.
/// Purchases are kept.
pub async fn delete_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, HandlerError> {
    state.accounts.delete_user(user.id).await.map_err(reject)?;
    info!(user_id = %user.id, "account deleted");

    let cookie = build_cookie(SESSION_COOKIE, "", 0, state.config.secure_cookies);
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]))
}

//=========================================================================================
// Helpers
//=========================================================================================

fn check_password(password: &str) -> Result<(), HandlerError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(reject(PortError::InvalidArgument(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, HandlerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
        })
}

fn email_taken(e: PortError) -> HandlerError {
    match e {
        PortError::Conflict(_) => (
            StatusCode::CONFLICT,
            "Email is already registered".to_string(),
        ),
        other => reject(other),
    }
}

/// Creates an auth session for the user and returns the matching `Set-Cookie` value.
async fn start_session(state: &AppState, user_id: Uuid) -> Result<String, HandlerError> {
    let auth_session_id = Uuid::new_v4().to_string();
    let lifetime = Duration::days(state.config.auth_session_days);

    state
        .accounts
        .create_auth_session(&auth_session_id, user_id, Utc::now() + lifetime)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    Ok(build_cookie(
        SESSION_COOKIE,
        &auth_session_id,
        lifetime.num_seconds(),
        state.config.secure_cookies,
    ))
}

/// Rejects the request with 403 unless the user holds one of `roles`.
pub fn require_role(user: &AuthUser, roles: &[Role]) -> Result<(), HandlerError> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(reject(PortError::Forbidden))
    }
}

//! REST endpoints for signup, login, logout and the current user.

use std::sync::LazyLock;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use regex::Regex;
use tracing::info;

use crate::api::AppState;
use crate::auth::extract::{AuthUser, ClientIp};
use crate::auth::model::{
    LoginRequest, MessageResponse, SignupRequest, TokenResponse, User, normalize_email,
};
use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::error::{ApiError, AuthError, DatabaseError};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(AuthError::InvalidEmail)
    }
}

/// POST /api/v1/auth/signup
async fn signup(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<SignupRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    state.rate_limiter.check(ip).await?;

    let email = normalize_email(&req.email);
    validate_email(&email)?;
    validate_password(&req.password)?;

    if state.db.get_user_by_email(&email).await?.is_some() {
        return Err(AuthError::EmailTaken.into());
    }

    let hash = hash_password(&req.password)?;
    let full_name = req
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let user = state
        .db
        .create_user(&email, &hash, full_name)
        .await
        .map_err(|e| match e {
            DatabaseError::Constraint(_) => ApiError::from(AuthError::EmailTaken),
            other => ApiError::from(other),
        })?;

    info!(user_id = user.id, "User signed up");
    let token = state.tokens.issue(&user.email)?;
    Ok(Json(TokenResponse::bearer(token)))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    state.rate_limiter.check(ip).await?;

    let email = normalize_email(&req.email);
    let creds = state
        .db
        .get_user_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !verify_password(&req.password, &creds.password_hash) {
        info!(user_id = creds.user.id, "Login rejected: wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    info!(user_id = creds.user.id, "User logged in");
    let token = state.tokens.issue(&creds.user.email)?;
    Ok(Json(TokenResponse::bearer(token)))
}

/// POST /api/v1/auth/logout
///
/// Tokens are stateless; the client discards its copy.
async fn logout(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<MessageResponse>, ApiError> {
    state.rate_limiter.check(ip).await?;
    Ok(Json(MessageResponse {
        message: "Successfully logged out".to_string(),
    }))
}

/// GET /api/v1/auth/me
async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// Build the auth REST routes.
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/auth/signup", post(signup))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/me", get(me))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.co").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("two@@example.com").is_err());
        assert!(validate_email("spaces in@example.com").is_err());
        assert!(validate_email("nodot@example").is_err());
    }
}

use crate::db;
use crate::domain::models::UserRole;
use crate::state::SharedState;
use crate::web::error::{ApiError, ApiResult};
use crate::web::session::{self, SESSION_HOURS};
use argon2::{password_hash::PasswordHash, Argon2, PasswordVerifier};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub role: UserRole,
    pub name: String,
    pub token: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new().route("/login", post(login)).with_state(state)
}

fn session_cookie(token: &str, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "session={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure_flag}",
        SESSION_HOURS * 3600
    )
}

async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(HeaderMap, Json<LoginResponse>)> {
    let ip = addr.ip();
    if !state.login_limiter.check(ip).await {
        tracing::warn!("Login rate limit exceeded for IP: {}", ip);
        return Err(ApiError::RateLimited);
    }

    let email = payload.email.trim().to_lowercase();
    let user = db::find_user_by_email(&state.pool, &email)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.hash).map_err(|e| {
        tracing::error!("Stored hash for user {} is unreadable: {}", user.id, e);
        ApiError::Unauthorized
    })?;
    Argon2::default()
        .verify_password(payload.code.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = session::sign_session(user.id, user.role, &state.config.session_key)
        .map_err(|e| ApiError::Internal(e.into()))?;

    let mut headers = HeaderMap::new();
    let cookie = HeaderValue::from_str(&session_cookie(&token, state.config.secure_cookies))
        .map_err(|e| ApiError::Internal(e.into()))?;
    headers.insert(header::SET_COOKIE, cookie);

    tracing::info!("User {} logged in as {}", user.id, user.role.as_str());
    Ok((
        headers,
        Json(LoginResponse {
            user_id: user.id,
            role: user.role,
            name: user.name,
            token,
        }),
    ))
}

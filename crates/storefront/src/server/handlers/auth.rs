//! `/api/auth/*`

use axum::{extract::State, http::StatusCode, Json};
use common::protocol::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, UserProfile};

use crate::error::AppResult;
use crate::server::extract::{AuthUser, ValidJson};
use crate::server::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let resp = state.auth.register(&req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.auth.login(&req).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.auth.refresh(&req.refresh_token).await?))
}

/// Revokes the presented refresh token. Needs no access token, so a client
/// whose access token already expired can still sign out.
pub async fn logout(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RefreshRequest>,
) -> AppResult<StatusCode> {
    state.auth.logout(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<UserProfile>> {
    Ok(Json(state.auth.profile(user.id).await?))
}

//! Partner applications.

use axum::{extract::State, http::StatusCode, Json};
use common::protocol::{
    ApplicationListQuery, PartnerApplication, PartnerApplicationRequest, RejectApplicationRequest,
    Role,
};

use crate::error::AppResult;
use crate::server::extract::{AuthUser, ValidJson, ValidPath, ValidQuery};
use crate::server::state::AppState;

pub async fn apply(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<PartnerApplicationRequest>,
) -> AppResult<(StatusCode, Json<PartnerApplication>)> {
    // A token minted before promotion still says Customer; the service
    // re-checks the stored role.
    user.require(&[Role::Customer, Role::Partner])?;
    Ok((StatusCode::CREATED, Json(state.partners.apply(user.id, &req).await?)))
}

pub async fn mine(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<Vec<PartnerApplication>>> {
    Ok(Json(state.partners.mine(user.id).await?))
}

pub async fn admin_list(
    State(state): State<AppState>,
    user: AuthUser,
    ValidQuery(query): ValidQuery<ApplicationListQuery>,
) -> AppResult<Json<Vec<PartnerApplication>>> {
    user.require_admin()?;
    Ok(Json(state.partners.list(query.status).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<PartnerApplication>> {
    user.require_admin()?;
    Ok(Json(state.partners.approve(user.id, id).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
    ValidJson(req): ValidJson<RejectApplicationRequest>,
) -> AppResult<Json<PartnerApplication>> {
    user.require_admin()?;
    Ok(Json(state.partners.reject(user.id, id, &req.reason).await?))
}

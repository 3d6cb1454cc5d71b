//! Checkout, capture and order management.

use axum::{extract::State, http::StatusCode, Json};
use common::protocol::{
    CheckoutRequest, CheckoutResponse, Order, OrderListQuery, Role, UpdateOrderStatusRequest,
};

use crate::error::AppResult;
use crate::server::extract::{AuthUser, ValidJson, ValidPath, ValidQuery};
use crate::server::state::AppState;

pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<CheckoutResponse>)> {
    let resp = state.orders.checkout(user.id, &req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn capture(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.capture(user.id, id).await?))
}

pub async fn list_mine(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_for_user(user.id).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.get_for(user.id, user.role, id).await?))
}

pub async fn admin_list(
    State(state): State<AppState>,
    user: AuthUser,
    ValidQuery(query): ValidQuery<OrderListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    user.require_admin()?;
    Ok(Json(state.orders.list_all(query.status).await?))
}

pub async fn partner_list(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<Order>>> {
    user.require(&[Role::Partner])?;
    Ok(Json(state.orders.list_for_partners().await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
    ValidJson(req): ValidJson<UpdateOrderStatusRequest>,
) -> AppResult<Json<Order>> {
    user.require(&[Role::Admin, Role::Partner])?;
    Ok(Json(state.orders.update_status(user.role, id, req.status).await?))
}

//! Public catalog reads and admin catalog writes.

use axum::{extract::State, http::StatusCode, Json};
use common::protocol::{
    Bouquet, BouquetQuery, BouquetRequest, Image, ImageRequest, Occasion, OccasionRequest, Page,
};

use crate::error::AppResult;
use crate::server::extract::{AuthUser, ValidJson, ValidPath, ValidQuery};
use crate::server::state::AppState;

pub async fn list_occasions(State(state): State<AppState>) -> AppResult<Json<Vec<Occasion>>> {
    let snapshot = state.catalog.list_occasions().await?;
    Ok(Json(snapshot.as_ref().clone()))
}

pub async fn get_occasion(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<Occasion>> {
    Ok(Json(state.catalog.get_occasion(id).await?))
}

pub async fn list_bouquets(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<BouquetQuery>,
) -> AppResult<Json<Page<Bouquet>>> {
    Ok(Json(state.catalog.list_bouquets(&query).await?))
}

pub async fn get_bouquet(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<Bouquet>> {
    Ok(Json(state.catalog.get_bouquet(id).await?))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

pub async fn create_occasion(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<OccasionRequest>,
) -> AppResult<(StatusCode, Json<Occasion>)> {
    user.require_admin()?;
    Ok((StatusCode::CREATED, Json(state.catalog.create_occasion(&req).await?)))
}

pub async fn update_occasion(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
    ValidJson(req): ValidJson<OccasionRequest>,
) -> AppResult<Json<Occasion>> {
    user.require_admin()?;
    Ok(Json(state.catalog.update_occasion(id, &req).await?))
}

pub async fn delete_occasion(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    state.catalog.delete_occasion(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_bouquet(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<BouquetRequest>,
) -> AppResult<(StatusCode, Json<Bouquet>)> {
    user.require_admin()?;
    Ok((StatusCode::CREATED, Json(state.catalog.create_bouquet(&req).await?)))
}

pub async fn update_bouquet(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
    ValidJson(req): ValidJson<BouquetRequest>,
) -> AppResult<Json<Bouquet>> {
    user.require_admin()?;
    Ok(Json(state.catalog.update_bouquet(id, &req).await?))
}

pub async fn delete_bouquet(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    state.catalog.delete_bouquet(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_image(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(bouquet_id): ValidPath<i64>,
    ValidJson(req): ValidJson<ImageRequest>,
) -> AppResult<(StatusCode, Json<Image>)> {
    user.require_admin()?;
    Ok((StatusCode::CREATED, Json(state.catalog.add_image(bouquet_id, &req).await?)))
}

pub async fn delete_image(
    State(state): State<AppState>,
    user: AuthUser,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    state.catalog.delete_image(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

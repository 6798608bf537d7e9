//! Compute registry endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use netloom_shared::{ComputeCreate, ComputeInfo, ComputeUpdate};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<ComputeInfo>> {
    Json(state.controller.list_computes())
}

pub async fn create(
    State(state): State<AppState>,
    Json(create): Json<ComputeCreate>,
) -> ApiResult<(StatusCode, Json<ComputeInfo>)> {
    let info = state.controller.add_compute(create).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(compute_id): Path<Uuid>,
) -> ApiResult<Json<ComputeInfo>> {
    Ok(Json(state.controller.get_compute(compute_id)?.info()))
}

pub async fn update(
    State(state): State<AppState>,
    Path(compute_id): Path<Uuid>,
    Json(update): Json<ComputeUpdate>,
) -> ApiResult<Json<ComputeInfo>> {
    Ok(Json(state.controller.update_compute(compute_id, update)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(compute_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.controller.delete_compute(compute_id)?;
    Ok(StatusCode::NO_CONTENT)
}

//! Link and capture endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use netloom_shared::{CaptureStart, LinkCreate, LinkInfo, LinkUpdate};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<LinkInfo>>> {
    Ok(Json(state.controller.get_project(project_id)?.list_links()))
}

pub async fn create(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(create): Json<LinkCreate>,
) -> ApiResult<(StatusCode, Json<LinkInfo>)> {
    let info = state
        .controller
        .get_project(project_id)?
        .create_link(create)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((project_id, link_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<LinkInfo>> {
    Ok(Json(
        state.controller.get_project(project_id)?.get_link(link_id)?.info(),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Path((project_id, link_id)): Path<(Uuid, Uuid)>,
    Json(update): Json<LinkUpdate>,
) -> ApiResult<Json<LinkInfo>> {
    Ok(Json(
        state
            .controller
            .get_project(project_id)?
            .update_link(link_id, update)
            .await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((project_id, link_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .controller
        .get_project(project_id)?
        .delete_link(link_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset(
    State(state): State<AppState>,
    Path((project_id, link_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<LinkInfo>> {
    Ok(Json(
        state
            .controller
            .get_project(project_id)?
            .reset_link(link_id)
            .await?,
    ))
}

pub async fn start_capture(
    State(state): State<AppState>,
    Path((project_id, link_id)): Path<(Uuid, Uuid)>,
    Json(start): Json<CaptureStart>,
) -> ApiResult<Json<LinkInfo>> {
    Ok(Json(
        state
            .controller
            .get_project(project_id)?
            .start_capture(link_id, start)
            .await?,
    ))
}

pub async fn stop_capture(
    State(state): State<AppState>,
    Path((project_id, link_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<LinkInfo>> {
    Ok(Json(
        state
            .controller
            .get_project(project_id)?
            .stop_capture(link_id)
            .await?,
    ))
}

//! Project and drawing endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use netloom_shared::topology::{Drawing, DrawingCreate, DrawingUpdate};
use netloom_shared::{ProjectCreate, ProjectInfo};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<ProjectInfo>> {
    Json(state.controller.list_projects())
}

pub async fn create(
    State(state): State<AppState>,
    Json(create): Json<ProjectCreate>,
) -> ApiResult<(StatusCode, Json<ProjectInfo>)> {
    let info = state.controller.create_project(create)?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<ProjectInfo>> {
    Ok(Json(state.controller.get_project(project_id)?.info()))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.controller.delete_project(project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn open(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<ProjectInfo>> {
    Ok(Json(state.controller.get_project(project_id)?.open()))
}

pub async fn close(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<ProjectInfo>> {
    Ok(Json(state.controller.get_project(project_id)?.close().await))
}

// ----------------------------------------------------------------------
// Drawings
// ----------------------------------------------------------------------

pub async fn list_drawings(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Drawing>>> {
    Ok(Json(state.controller.get_project(project_id)?.list_drawings()))
}

pub async fn create_drawing(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(create): Json<DrawingCreate>,
) -> ApiResult<(StatusCode, Json<Drawing>)> {
    let drawing = state
        .controller
        .get_project(project_id)?
        .create_drawing(create)?;
    Ok((StatusCode::CREATED, Json(drawing)))
}

pub async fn get_drawing(
    State(state): State<AppState>,
    Path((project_id, drawing_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Drawing>> {
    Ok(Json(
        state.controller.get_project(project_id)?.get_drawing(drawing_id)?,
    ))
}

pub async fn update_drawing(
    State(state): State<AppState>,
    Path((project_id, drawing_id)): Path<(Uuid, Uuid)>,
    Json(update): Json<DrawingUpdate>,
) -> ApiResult<Json<Drawing>> {
    Ok(Json(
        state
            .controller
            .get_project(project_id)?
            .update_drawing(drawing_id, update)?,
    ))
}

pub async fn delete_drawing(
    State(state): State<AppState>,
    Path((project_id, drawing_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .controller
        .get_project(project_id)?
        .delete_drawing(drawing_id)?;
    Ok(StatusCode::NO_CONTENT)
}

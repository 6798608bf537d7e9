//! Node lifecycle endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use netloom_shared::{NodeCreate, NodeInfo, NodeUpdate};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<NodeInfo>>> {
    Ok(Json(state.controller.get_project(project_id)?.list_nodes()))
}

pub async fn create(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(create): Json<NodeCreate>,
) -> ApiResult<(StatusCode, Json<NodeInfo>)> {
    let info = state.controller.create_node(project_id, create).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((project_id, node_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<NodeInfo>> {
    Ok(Json(
        state.controller.get_project(project_id)?.get_node(node_id)?.info(),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Path((project_id, node_id)): Path<(Uuid, Uuid)>,
    Json(update): Json<NodeUpdate>,
) -> ApiResult<Json<NodeInfo>> {
    Ok(Json(
        state
            .controller
            .get_project(project_id)?
            .update_node(node_id, update)?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((project_id, node_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .controller
        .get_project(project_id)?
        .delete_node(node_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Lifecycle actions
// ----------------------------------------------------------------------

macro_rules! node_action {
    ($name:ident) => {
        pub async fn $name(
            State(state): State<AppState>,
            Path((project_id, node_id)): Path<(Uuid, Uuid)>,
        ) -> ApiResult<Json<NodeInfo>> {
            let node = state.controller.get_project(project_id)?.get_node(node_id)?;
            node.$name().await?;
            Ok(Json(node.info()))
        }
    };
}

node_action!(start);
node_action!(stop);
node_action!(suspend);
node_action!(resume);
node_action!(reload);

// ----------------------------------------------------------------------
// Batch actions
// ----------------------------------------------------------------------

macro_rules! batch_action {
    ($name:ident) => {
        pub async fn $name(
            State(state): State<AppState>,
            Path(project_id): Path<Uuid>,
        ) -> ApiResult<StatusCode> {
            state.controller.get_project(project_id)?.$name().await?;
            Ok(StatusCode::NO_CONTENT)
        }
    };
}

batch_action!(start_all);
batch_action!(stop_all);
batch_action!(suspend_all);
batch_action!(reload_all);

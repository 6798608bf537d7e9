//! HTTP surface of the controller.
//!
//! Thin translation layer: handlers decode the request, call one
//! controller/project operation, and map the typed error kinds onto
//! stable status codes via [`ApiError`](crate::error::ApiError). No
//! orchestration logic lives here.

mod computes;
mod links;
mod nodes;
mod notifications;
mod projects;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Computes
        .route(
            "/v1/computes",
            get(computes::list).post(computes::create),
        )
        .route(
            "/v1/computes/{compute_id}",
            get(computes::get_one)
                .put(computes::update)
                .delete(computes::delete),
        )
        // Projects
        .route(
            "/v1/projects",
            get(projects::list).post(projects::create),
        )
        .route(
            "/v1/projects/{project_id}",
            get(projects::get_one).delete(projects::delete),
        )
        .route("/v1/projects/{project_id}/open", post(projects::open))
        .route("/v1/projects/{project_id}/close", post(projects::close))
        // Drawings
        .route(
            "/v1/projects/{project_id}/drawings",
            get(projects::list_drawings).post(projects::create_drawing),
        )
        .route(
            "/v1/projects/{project_id}/drawings/{drawing_id}",
            get(projects::get_drawing)
                .put(projects::update_drawing)
                .delete(projects::delete_drawing),
        )
        // Nodes
        .route(
            "/v1/projects/{project_id}/nodes",
            get(nodes::list).post(nodes::create),
        )
        .route("/v1/projects/{project_id}/nodes/start", post(nodes::start_all))
        .route("/v1/projects/{project_id}/nodes/stop", post(nodes::stop_all))
        .route(
            "/v1/projects/{project_id}/nodes/suspend",
            post(nodes::suspend_all),
        )
        .route(
            "/v1/projects/{project_id}/nodes/reload",
            post(nodes::reload_all),
        )
        .route(
            "/v1/projects/{project_id}/nodes/{node_id}",
            get(nodes::get_one).put(nodes::update).delete(nodes::delete),
        )
        .route(
            "/v1/projects/{project_id}/nodes/{node_id}/start",
            post(nodes::start),
        )
        .route(
            "/v1/projects/{project_id}/nodes/{node_id}/stop",
            post(nodes::stop),
        )
        .route(
            "/v1/projects/{project_id}/nodes/{node_id}/suspend",
            post(nodes::suspend),
        )
        .route(
            "/v1/projects/{project_id}/nodes/{node_id}/resume",
            post(nodes::resume),
        )
        .route(
            "/v1/projects/{project_id}/nodes/{node_id}/reload",
            post(nodes::reload),
        )
        // Links
        .route(
            "/v1/projects/{project_id}/links",
            get(links::list).post(links::create),
        )
        .route(
            "/v1/projects/{project_id}/links/{link_id}",
            get(links::get_one).put(links::update).delete(links::delete),
        )
        .route(
            "/v1/projects/{project_id}/links/{link_id}/reset",
            post(links::reset),
        )
        .route(
            "/v1/projects/{project_id}/links/{link_id}/capture/start",
            post(links::start_capture),
        )
        .route(
            "/v1/projects/{project_id}/links/{link_id}/capture/stop",
            post(links::stop_capture),
        )
        // Notifications
        .route("/v1/notifications", get(notifications::http_stream))
        .route("/v1/notifications/ws", get(notifications::websocket))
        .with_state(state)
}

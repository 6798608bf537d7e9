//! HTTP mapping for the controller error kinds.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use netloom_shared::ControllerError;

/// Response wrapper around [`ControllerError`] carrying its HTTP mapping.
pub struct ApiError(pub ControllerError);

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// Stable status mapping; the error kind alone decides the status,
    /// regardless of which operation raised it.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ControllerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ControllerError::Conflict(_) => StatusCode::CONFLICT,
            ControllerError::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ControllerError::Unsupported(_) => StatusCode::BAD_REQUEST,
            ControllerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ControllerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ControllerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ControllerError::Compute(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "status": status.as_u16(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use netloom_shared::EntityKind;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn error_kinds_map_to_stable_statuses() {
        let cases = [
            (
                ControllerError::not_found(EntityKind::Node, Uuid::nil()),
                StatusCode::NOT_FOUND,
            ),
            (
                ControllerError::Conflict("busy".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                ControllerError::Unreachable {
                    compute_id: Uuid::nil(),
                    reason: "down".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ControllerError::Unsupported("no suspend".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ControllerError::Timeout {
                    compute_id: Uuid::nil(),
                    elapsed: Duration::from_secs(20),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ControllerError::Compute("boom".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}

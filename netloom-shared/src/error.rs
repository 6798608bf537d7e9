//! Error types for the controller core.
//!
//! Every orchestration failure is one of a small set of kinds so the API
//! layer can map them to stable status signals regardless of which
//! operation raised them.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// The entity families the controller tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Compute,
    Project,
    Node,
    Link,
    Port,
    Drawing,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Compute => write!(f, "compute"),
            EntityKind::Project => write!(f, "project"),
            EntityKind::Node => write!(f, "node"),
            EntityKind::Link => write!(f, "link"),
            EntityKind::Port => write!(f, "port"),
            EntityKind::Drawing => write!(f, "drawing"),
        }
    }
}

/// All error kinds raised by the orchestration core.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Entity id unknown to the registry.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    /// Invalid state transition or an already-claimed resource.
    #[error("{0}")]
    Conflict(String),

    /// The target compute failed its liveness probe or refused the connection.
    #[error("compute {compute_id} is unreachable: {reason}")]
    Unreachable { compute_id: Uuid, reason: String },

    /// Capability not advertised by the compute for this operation.
    #[error("{0}")]
    Unsupported(String),

    /// A remote call exceeded its deadline; the remote state is ambiguous.
    #[error("request to compute {compute_id} timed out after {elapsed:?}")]
    Timeout { compute_id: Uuid, elapsed: Duration },

    /// Surfaced from the authorization collaborator, never generated here.
    #[error("{0}")]
    Forbidden(String),

    /// Surfaced from the authentication collaborator, never generated here.
    #[error("{0}")]
    Unauthorized(String),

    /// The compute accepted the request but reported a failure.
    #[error("compute error: {0}")]
    Compute(String),
}

impl ControllerError {
    /// Shorthand for a [`ControllerError::NotFound`] with any displayable id.
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        ControllerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type alias using ControllerError.
pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_entity() {
        let id = Uuid::nil();
        let err = ControllerError::not_found(EntityKind::Node, id);
        assert_eq!(
            err.to_string(),
            format!("node {} not found", Uuid::nil())
        );
    }

    #[test]
    fn timeout_is_distinguishable_from_unreachable() {
        let compute_id = Uuid::new_v4();
        let timeout = ControllerError::Timeout {
            compute_id,
            elapsed: Duration::from_secs(20),
        };
        let unreachable = ControllerError::Unreachable {
            compute_id,
            reason: "connection refused".to_string(),
        };
        assert!(matches!(timeout, ControllerError::Timeout { .. }));
        assert!(matches!(unreachable, ControllerError::Unreachable { .. }));
    }
}

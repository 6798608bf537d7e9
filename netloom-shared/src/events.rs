//! Topology change events fanned out to connected observers.
//!
//! Every mutation of the topology publishes exactly one of these to the
//! notification hub. The wire form is one JSON object per event, tagged by
//! a dotted `type` string so observers can route on it without decoding
//! the payload.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topology::{ComputeInfo, LinkInfo, NodeInfo, ProjectInfo};

/// A topology/state-change event.
///
/// Delivery contract: at-least-recent to connected observers. A slow
/// observer loses the oldest pending events first, never sees duplicates,
/// and always sees them in publish order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TopologyEvent {
    #[serde(rename = "compute.created")]
    ComputeCreated { compute_id: Uuid, payload: ComputeInfo },
    #[serde(rename = "compute.updated")]
    ComputeUpdated { compute_id: Uuid, payload: ComputeInfo },
    #[serde(rename = "compute.deleted")]
    ComputeDeleted { compute_id: Uuid, payload: ComputeInfo },

    #[serde(rename = "project.updated")]
    ProjectUpdated { project_id: Uuid, payload: ProjectInfo },
    #[serde(rename = "project.closed")]
    ProjectClosed { project_id: Uuid, payload: ProjectInfo },

    #[serde(rename = "node.created")]
    NodeCreated {
        project_id: Uuid,
        compute_id: Uuid,
        node_id: Uuid,
        payload: NodeInfo,
    },
    #[serde(rename = "node.updated")]
    NodeUpdated {
        project_id: Uuid,
        compute_id: Uuid,
        node_id: Uuid,
        payload: NodeInfo,
    },
    #[serde(rename = "node.deleted")]
    NodeDeleted {
        project_id: Uuid,
        compute_id: Uuid,
        node_id: Uuid,
        payload: NodeInfo,
    },

    #[serde(rename = "link.created")]
    LinkCreated {
        project_id: Uuid,
        link_id: Uuid,
        payload: LinkInfo,
    },
    #[serde(rename = "link.updated")]
    LinkUpdated {
        project_id: Uuid,
        link_id: Uuid,
        payload: LinkInfo,
    },
    #[serde(rename = "link.deleted")]
    LinkDeleted {
        project_id: Uuid,
        link_id: Uuid,
        payload: LinkInfo,
    },
}

impl TopologyEvent {
    /// The dotted type string, for logging and observer-side routing.
    pub fn kind(&self) -> &'static str {
        match self {
            TopologyEvent::ComputeCreated { .. } => "compute.created",
            TopologyEvent::ComputeUpdated { .. } => "compute.updated",
            TopologyEvent::ComputeDeleted { .. } => "compute.deleted",
            TopologyEvent::ProjectUpdated { .. } => "project.updated",
            TopologyEvent::ProjectClosed { .. } => "project.closed",
            TopologyEvent::NodeCreated { .. } => "node.created",
            TopologyEvent::NodeUpdated { .. } => "node.updated",
            TopologyEvent::NodeDeleted { .. } => "node.deleted",
            TopologyEvent::LinkCreated { .. } => "link.created",
            TopologyEvent::LinkUpdated { .. } => "link.updated",
            TopologyEvent::LinkDeleted { .. } => "link.deleted",
        }
    }
}

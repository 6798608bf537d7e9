//! Topology data model shared between the controller and its clients.
//!
//! Entity model:
//! - **Compute**: a remote agent that runs emulators for one or more nodes
//! - **Project**: one topology (nodes, links, drawings)
//! - **Node**: one emulated device, bound to exactly one compute for life
//! - **Link**: a logical connection between two node ports, realized as a
//!   NIO binding (UDP tunnel, internal bridge or tap)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-endpoint packet filters (filter name -> parameter list).
pub type PacketFilters = HashMap<String, Vec<serde_json::Value>>;

// ============================================================================
// State Enums
// ============================================================================

/// Node lifecycle status. Transient phases (suspending, reloading, ...) are
/// not stable states; the per-node lock blocks new transitions while one is
/// in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Stopped,
    Started,
    Suspended,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Stopped => write!(f, "stopped"),
            NodeStatus::Started => write!(f, "started"),
            NodeStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(NodeStatus::Stopped),
            "started" => Ok(NodeStatus::Started),
            "suspended" => Ok(NodeStatus::Suspended),
            _ => Err(format!("Unknown node status: {}", s)),
        }
    }
}

/// Project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Opened,
    Closed,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Opened => write!(f, "opened"),
            ProjectStatus::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// Compute Types
// ============================================================================

/// Capabilities advertised by a compute agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Emulator families this compute can host ("qemu", "docker", ...).
    #[serde(default)]
    pub node_types: Vec<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub memory_mb: u64,
    /// Whether suspend/resume is supported by the drivers on this compute.
    #[serde(default)]
    pub suspend: bool,
    /// Whether the compute implements reload as one atomic operation.
    #[serde(default)]
    pub atomic_reload: bool,
}

/// Compute registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeCreate {
    #[serde(default)]
    pub compute_id: Option<Uuid>,
    pub name: String,
    /// Transport scheme, "http" or "https".
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Compute update request; the endpoint address is fixed at registration,
/// only the display name and credentials can change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Compute as reported by the controller API. The credential is write-only
/// and never serialized back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeInfo {
    pub compute_id: Uuid,
    pub name: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    /// Last-known reachability, updated only by the probe loop.
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<DateTime<Utc>>,
}

// ============================================================================
// Project Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreate {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: Uuid,
    pub name: String,
    pub status: ProjectStatus,
}

// ============================================================================
// Node Types
// ============================================================================

/// A port exposed by a node, addressed by (adapter_number, port_number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub adapter_number: u32,
    pub port_number: u32,
    pub name: String,
}

/// Node creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreate {
    #[serde(default)]
    pub node_id: Option<Uuid>,
    pub compute_id: Uuid,
    pub name: String,
    /// Discriminates which compute driver handles this node.
    pub node_type: String,
    /// Declared properties (ram, cpus, adapters, ...), passed through to the
    /// driver. `adapters` controls how many ports the node exposes.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Node update request; only declared properties and the name can change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: Uuid,
    pub project_id: Uuid,
    pub compute_id: Uuid,
    pub name: String,
    pub node_type: String,
    pub status: NodeStatus,
    /// Set after an ambiguous timeout; cleared by the next confirmed
    /// transition. Requires operator reconciliation.
    pub degraded: bool,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub ports: Vec<PortInfo>,
}

// ============================================================================
// Link Types
// ============================================================================

/// One side of a link: a specific port on a specific node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub node_id: Uuid,
    #[serde(default)]
    pub adapter_number: u32,
    #[serde(default)]
    pub port_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Link creation request. Exactly two endpoints for point-to-point links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCreate {
    #[serde(default)]
    pub link_id: Option<Uuid>,
    pub endpoints: Vec<LinkEndpoint>,
    #[serde(default)]
    pub filters: PacketFilters,
}

/// One end of an established UDP tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpTunnelEnd {
    pub compute_id: Uuid,
    /// Port the local compute listens on.
    pub lport: u16,
    /// Peer address frames are sent to.
    pub rhost: String,
    pub rport: u16,
    /// Allocation token returned by the compute, used to release the port.
    pub token: String,
}

/// The transport-level mechanism carrying frames between bound ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NioDescriptor {
    /// Cross-compute tunnel; one end per compute.
    UdpTunnel { ends: [UdpTunnelEnd; 2] },
    /// Both ports on the same compute, wired through an internal bridge.
    InternalBridge { compute_id: Uuid, bridge_name: String },
    /// Host tap device (single-compute, operator-managed).
    Tap { compute_id: Uuid, device: String },
}

/// Packet capture request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStart {
    #[serde(default)]
    pub capture_file_name: Option<String>,
    #[serde(default = "default_data_link_type")]
    pub data_link_type: String,
}

fn default_data_link_type() -> String {
    "DLT_EN10MB".to_string()
}

/// An active packet capture on a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDescriptor {
    pub file_name: String,
    pub data_link_type: String,
}

/// Link update request: filters and filter-level suspend only. Endpoints
/// are immutable once the link exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkUpdate {
    #[serde(default)]
    pub filters: Option<PacketFilters>,
    #[serde(default)]
    pub suspend: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    pub link_id: Uuid,
    pub project_id: Uuid,
    pub endpoints: Vec<LinkEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nio: Option<NioDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureDescriptor>,
    #[serde(default)]
    pub filters: PacketFilters,
    /// Filter-level suspend: the link exists but frames are dropped.
    pub suspended: bool,
}

// ============================================================================
// Drawing Types
// ============================================================================

/// Drawing creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingCreate {
    #[serde(default)]
    pub drawing_id: Option<Uuid>,
    pub svg: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub z: i32,
    #[serde(default)]
    pub rotation: i16,
}

/// Drawing update request; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawingUpdate {
    #[serde(default)]
    pub svg: Option<String>,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default)]
    pub z: Option<i32>,
    #[serde(default)]
    pub rotation: Option<i16>,
}

/// Free-form annotation on the topology canvas. The SVG payload is opaque
/// to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drawing {
    pub drawing_id: Uuid,
    pub project_id: Uuid,
    pub svg: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub z: i32,
    #[serde(default)]
    pub rotation: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_status_round_trip() {
        for status in [NodeStatus::Stopped, NodeStatus::Started, NodeStatus::Suspended] {
            let parsed: NodeStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("running".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn compute_create_defaults_scheme() {
        let json = r#"{"name":"lab-1","host":"10.0.0.5","port":3080}"#;
        let create: ComputeCreate = serde_json::from_str(json).unwrap();
        assert_eq!(create.scheme, "http");
        assert_eq!(create.compute_id, None);
    }

    #[test]
    fn capture_start_defaults_data_link_type() {
        let capture: CaptureStart = serde_json::from_str("{}").unwrap();
        assert_eq!(capture.data_link_type, "DLT_EN10MB");
        assert_eq!(capture.capture_file_name, None);
    }

    #[test]
    fn nio_descriptor_is_tagged() {
        let nio = NioDescriptor::InternalBridge {
            compute_id: Uuid::nil(),
            bridge_name: "link-42".to_string(),
        };
        let json = serde_json::to_string(&nio).unwrap();
        assert!(json.contains("\"type\":\"internal_bridge\""));
        let decoded: NioDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, nio);
    }

    #[test]
    fn udp_tunnel_serializes_both_ends() {
        let ends = [
            UdpTunnelEnd {
                compute_id: Uuid::new_v4(),
                lport: 20000,
                rhost: "10.0.0.6".to_string(),
                rport: 20001,
                token: "a".to_string(),
            },
            UdpTunnelEnd {
                compute_id: Uuid::new_v4(),
                lport: 20001,
                rhost: "10.0.0.5".to_string(),
                rport: 20000,
                token: "b".to_string(),
            },
        ];
        let nio = NioDescriptor::UdpTunnel { ends: ends.clone() };
        let json = serde_json::to_string(&nio).unwrap();
        let decoded: NioDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, NioDescriptor::UdpTunnel { ends });
    }
}

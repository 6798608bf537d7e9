//! The compute capability surface.
//!
//! A compute is a remote agent that actually runs the emulators. The
//! controller core only ever talks to the [`ComputeApi`] trait; the HTTP
//! implementation lives in [`client`], and tests drive the core against an
//! in-process mock. One implementing variant per executor family exists on
//! the compute side — the controller never sees concrete driver types.
//!
//! All operations are remote calls with a bounded timeout. The client never
//! assumes success until the remote response confirms it: a timeout leaves
//! the remote state ambiguous and is surfaced as a distinct
//! [`ControllerError::Timeout`](crate::error::ControllerError::Timeout),
//! never silently retried.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::topology::{Capabilities, PacketFilters};

pub use client::HttpComputeClient;

// ============================================================================
// Wire Types
// ============================================================================

/// Node materialization request (controller -> compute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: Uuid,
    pub name: String,
    pub node_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A UDP listen endpoint allocated by a compute for one tunnel end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpAllocation {
    pub lport: u16,
    /// Opaque token identifying the allocation, required to release it.
    pub token: String,
}

/// NIO binding request for one port (controller -> compute).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NioSpec {
    /// Bind the port to a local UDP listener pointed at the peer end.
    Udp {
        lport: u16,
        rhost: String,
        rport: u16,
        #[serde(default)]
        filters: PacketFilters,
    },
    /// Attach the port to a compute-internal bridge.
    Bridge {
        bridge_name: String,
        #[serde(default)]
        filters: PacketFilters,
    },
    /// Attach the port to a host tap device.
    Tap { device: String },
}

/// Packet capture parameters (controller -> compute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub file_name: String,
    pub data_link_type: String,
}

// ============================================================================
// Capability Surface
// ============================================================================

/// The uniform capability surface every remote executor satisfies,
/// independent of which emulator families it hosts.
///
/// Mutating calls are NOT retried by the core; read-only probes are safe to
/// retry. Ambiguous outcomes (timeouts) are the caller's responsibility to
/// reconcile.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Liveness probe; returns the advertised capabilities on success.
    async fn probe(&self) -> Result<Capabilities>;

    async fn create_node(&self, project_id: Uuid, spec: &NodeSpec) -> Result<()>;
    async fn delete_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()>;

    async fn start_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()>;
    async fn stop_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()>;
    async fn suspend_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()>;
    async fn resume_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()>;
    /// Atomic reload; only valid when the compute advertises
    /// [`Capabilities::atomic_reload`].
    async fn reload_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()>;

    /// Allocate a UDP listen port for one tunnel end.
    async fn allocate_udp_port(&self, project_id: Uuid) -> Result<UdpAllocation>;
    /// Release a previously allocated UDP listen port.
    async fn release_udp_port(&self, project_id: Uuid, allocation: &UdpAllocation) -> Result<()>;

    async fn add_port_binding(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
        nio: &NioSpec,
    ) -> Result<()>;
    async fn remove_port_binding(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> Result<()>;

    async fn start_capture(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
        capture: &CaptureSpec,
    ) -> Result<()>;
    async fn stop_capture(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> Result<()>;
}

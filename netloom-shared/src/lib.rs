//! netloom-shared: Shared types and utilities for the netloom controller.
//!
//! This library holds everything that is meaningful outside the controller
//! daemon itself: the typed error kinds, the topology data model, the
//! notification event schema, and the HTTP client used to drive remote
//! compute agents.
//!
//! ## Modules
//!
//! - [`error`]: Typed error kinds for all controller failure modes
//! - [`topology`]: Compute/project/node/link data model and request DTOs
//! - [`events`]: Topology change events fanned out to observers
//! - [`compute`]: The compute capability surface and its HTTP client
//! - [`logging`]: Tracing initialization helpers

pub mod compute;
pub mod error;
pub mod events;
pub mod logging;
pub mod topology;

// Re-export commonly used types at crate root
pub use compute::{ComputeApi, HttpComputeClient, NioSpec, NodeSpec, UdpAllocation};
pub use error::{ControllerError, EntityKind, Result};
pub use events::TopologyEvent;
pub use topology::{
    Capabilities, CaptureDescriptor, CaptureStart, ComputeCreate, ComputeInfo, ComputeUpdate,
    LinkCreate, LinkEndpoint, LinkInfo, LinkUpdate, NioDescriptor, NodeCreate, NodeInfo,
    NodeStatus, NodeUpdate, PacketFilters, PortInfo, ProjectCreate, ProjectInfo, ProjectStatus,
    UdpTunnelEnd,
};

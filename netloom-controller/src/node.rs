//! Per-node lifecycle state machine.
//!
//! Translates high-level intents (start/stop/suspend/resume/reload) into
//! compute calls and validates transitions. A per-node advisory lock is
//! acquired before the status is read and held until the remote call
//! settles, so at most one lifecycle transition is in flight per node and
//! a concurrent start/delete can never interleave partially.
//!
//! A remote timeout leaves the node in its last *confirmed* status with the
//! `degraded` marker set; nothing is retried automatically.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use netloom_shared::compute::NodeSpec;
use netloom_shared::topology::NodeUpdate;
use netloom_shared::{ControllerError, NodeInfo, NodeStatus, PortInfo, Result, TopologyEvent};

use crate::controller::ComputeHandle;
use crate::notify::NotificationHub;

/// One emulated device, bound to exactly one compute for its entire life.
pub struct Node {
    id: Uuid,
    project_id: Uuid,
    compute: Arc<ComputeHandle>,
    node_type: String,
    name: RwLock<String>,
    status: RwLock<NodeStatus>,
    degraded: AtomicBool,
    properties: RwLock<serde_json::Map<String, serde_json::Value>>,
    ports: RwLock<Vec<PortInfo>>,
    /// Entity-scoped advisory lock; at most one in-flight transition.
    lifecycle: Mutex<()>,
    hub: NotificationHub,
}

impl Node {
    pub(crate) fn new(
        id: Uuid,
        project_id: Uuid,
        compute: Arc<ComputeHandle>,
        name: String,
        node_type: String,
        properties: serde_json::Map<String, serde_json::Value>,
        hub: NotificationHub,
    ) -> Result<Self> {
        let ports = derive_ports(&properties)?;
        Ok(Self {
            id,
            project_id,
            compute,
            node_type,
            name: RwLock::new(name),
            status: RwLock::new(NodeStatus::Stopped),
            degraded: AtomicBool::new(false),
            properties: RwLock::new(properties),
            ports: RwLock::new(ports),
            lifecycle: Mutex::new(()),
            hub,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn compute(&self) -> &Arc<ComputeHandle> {
        &self.compute
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// The ports this node exposes, derived from the declared adapter
    /// count.
    pub fn ports(&self) -> Vec<PortInfo> {
        self.ports.read().clone()
    }

    pub fn has_port(&self, adapter_number: u32, port_number: u32) -> bool {
        self.ports
            .read()
            .iter()
            .any(|p| p.adapter_number == adapter_number && p.port_number == port_number)
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.id,
            project_id: self.project_id,
            compute_id: self.compute.id(),
            name: self.name.read().clone(),
            node_type: self.node_type.clone(),
            status: self.status(),
            degraded: self.is_degraded(),
            properties: self.properties.read().clone(),
            ports: self.ports.read().clone(),
        }
    }

    /// The spec sent to the compute to materialize this node.
    pub(crate) fn spec(&self) -> NodeSpec {
        NodeSpec {
            node_id: self.id,
            name: self.name.read().clone(),
            node_type: self.node_type.clone(),
            properties: self.properties.read().clone(),
        }
    }

    fn publish_updated(&self) {
        self.hub.publish(TopologyEvent::NodeUpdated {
            project_id: self.project_id,
            compute_id: self.compute.id(),
            node_id: self.id,
            payload: self.info(),
        });
    }

    /// Record a confirmed transition and publish `node.updated`.
    fn confirm(&self, status: NodeStatus) {
        *self.status.write() = status;
        self.degraded.store(false, Ordering::Relaxed);
        self.publish_updated();
    }

    /// An ambiguous outcome: keep the last confirmed status, flag the node
    /// for operator reconciliation.
    fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
        self.publish_updated();
    }

    fn settle(&self, result: Result<()>, on_success: NodeStatus) -> Result<()> {
        match result {
            Ok(()) => {
                self.confirm(on_success);
                Ok(())
            }
            Err(err @ ControllerError::Timeout { .. }) => {
                warn!(node = %self.id, error = %err, "lifecycle call timed out, node degraded");
                self.mark_degraded();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Start the node. Allowed from `stopped` only; a compute-reported
    /// failure leaves the node `stopped` and is not retried.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        match self.status() {
            NodeStatus::Started => {
                return Err(ControllerError::Conflict(format!(
                    "node {} is already started",
                    self.id
                )))
            }
            NodeStatus::Suspended => {
                return Err(ControllerError::Conflict(format!(
                    "node {} is suspended, resume it instead",
                    self.id
                )))
            }
            NodeStatus::Stopped => {}
        }
        let result = self
            .compute
            .api()
            .start_node(self.project_id, &self.node_type, self.id)
            .await;
        self.settle(result, NodeStatus::Started)
    }

    /// Stop the node. Idempotent: stopping an already-stopped node succeeds
    /// without a remote call.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<()> {
        if self.status() == NodeStatus::Stopped {
            return Ok(());
        }
        let result = self
            .compute
            .api()
            .stop_node(self.project_id, &self.node_type, self.id)
            .await;
        self.settle(result, NodeStatus::Stopped)
    }

    /// Suspend the node. Requires the compute to advertise suspend support.
    pub async fn suspend(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.require_suspend_capability()?;
        if self.status() != NodeStatus::Started {
            return Err(ControllerError::Conflict(format!(
                "node {} is {}, only a started node can be suspended",
                self.id,
                self.status()
            )));
        }
        let result = self
            .compute
            .api()
            .suspend_node(self.project_id, &self.node_type, self.id)
            .await;
        self.settle(result, NodeStatus::Suspended)
    }

    /// Resume a suspended node.
    pub async fn resume(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.require_suspend_capability()?;
        if self.status() != NodeStatus::Suspended {
            return Err(ControllerError::Conflict(format!(
                "node {} is {}, only a suspended node can be resumed",
                self.id,
                self.status()
            )));
        }
        let result = self
            .compute
            .api()
            .resume_node(self.project_id, &self.node_type, self.id)
            .await;
        self.settle(result, NodeStatus::Started)
    }

    fn require_suspend_capability(&self) -> Result<()> {
        let supported = self
            .compute
            .capabilities()
            .map(|caps| caps.suspend)
            .unwrap_or(false);
        if supported {
            Ok(())
        } else {
            Err(ControllerError::Unsupported(format!(
                "compute {} does not support suspend/resume",
                self.compute.id()
            )))
        }
    }

    /// Reload the node: one atomic intent to the caller. If the compute does
    /// not implement atomic reload the controller sequences stop then start;
    /// a failure after the stop leaves the node `stopped` and reports the
    /// partial failure.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.status() != NodeStatus::Started {
            return Err(ControllerError::Conflict(format!(
                "node {} is {}, only a started node can be reloaded",
                self.id,
                self.status()
            )));
        }

        let atomic = self
            .compute
            .capabilities()
            .map(|caps| caps.atomic_reload)
            .unwrap_or(false);

        if atomic {
            let result = self
                .compute
                .api()
                .reload_node(self.project_id, &self.node_type, self.id)
                .await;
            return self.settle(result, NodeStatus::Started);
        }

        let stop = self
            .compute
            .api()
            .stop_node(self.project_id, &self.node_type, self.id)
            .await;
        self.settle(stop, NodeStatus::Stopped)?;

        let start = self
            .compute
            .api()
            .start_node(self.project_id, &self.node_type, self.id)
            .await;
        self.settle(start, NodeStatus::Started).map_err(|err| {
            // The stop already succeeded; report the partial outcome.
            warn!(node = %self.id, error = %err, "reload failed after stop, node left stopped");
            ControllerError::Conflict(format!(
                "reload of node {} failed after stop, node is stopped: {}",
                self.id, err
            ))
        })
    }

    /// Force the node to `stopped` ahead of deletion, then remove it on the
    /// compute. The caller holds the registry side; a stop failure refuses
    /// the deletion with `Conflict`.
    pub(crate) async fn prepare_delete(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.status() != NodeStatus::Stopped {
            if let Err(err) = self.stop_locked().await {
                return Err(ControllerError::Conflict(format!(
                    "cannot delete node {}: stop failed: {}",
                    self.id, err
                )));
            }
        }
        let result = self
            .compute
            .api()
            .delete_node(self.project_id, &self.node_type, self.id)
            .await;
        match result {
            Ok(()) => {
                info!(node = %self.id, "node removed on compute");
                Ok(())
            }
            Err(err @ ControllerError::Timeout { .. }) => {
                warn!(node = %self.id, error = %err, "delete call timed out, node degraded");
                self.mark_degraded();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Apply a record-level update (name, declared properties). The caller
    /// validated any adapter-count change and supplies the re-derived port
    /// list.
    pub(crate) fn apply_update(&self, update: NodeUpdate, ports: Option<Vec<PortInfo>>) {
        if let Some(name) = update.name {
            *self.name.write() = name;
        }
        if let Some(properties) = update.properties {
            *self.properties.write() = properties;
        }
        if let Some(ports) = ports {
            *self.ports.write() = ports;
        }
        self.publish_updated();
    }
}

/// Hard ceiling on declared adapters; above this the declaration is
/// treated as operator error rather than a port list to materialize.
pub(crate) const MAX_ADAPTERS: u64 = 64;

/// One port per declared adapter; adapter count defaults to 1.
pub(crate) fn derive_ports(
    properties: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<PortInfo>> {
    let adapters = match properties.get("adapters") {
        None => 1,
        Some(value) => value
            .as_u64()
            .filter(|count| *count <= MAX_ADAPTERS)
            .ok_or_else(|| {
                ControllerError::Conflict(format!(
                    "invalid adapter count {}: expected an integer no greater than {}",
                    value, MAX_ADAPTERS
                ))
            })?,
    };
    Ok((0..adapters as u32)
        .map(|adapter_number| PortInfo {
            adapter_number,
            port_number: 0,
            name: format!("eth{}", adapter_number),
        })
        .collect())
}

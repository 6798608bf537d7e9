//! One project: a topology of nodes, links and drawings.
//!
//! The project owns the authoritative record of every entity in it and the
//! port occupancy map links claim endpoints from. All registry maps are
//! guarded by short critical sections and never held across a remote call.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use netloom_shared::topology::{Drawing, DrawingCreate, DrawingUpdate};
use netloom_shared::{
    ControllerError, EntityKind, NodeCreate, NodeInfo, NodeUpdate, ProjectInfo, ProjectStatus,
    Result, TopologyEvent,
};

use crate::controller::ComputeHandle;
use crate::link::Link;
use crate::node::{derive_ports, Node};
use crate::notify::NotificationHub;

/// A port occupied by a link: (node, adapter, port).
pub(crate) type PortKey = (Uuid, u32, u32);

pub struct Project {
    id: Uuid,
    name: String,
    status: RwLock<ProjectStatus>,
    nodes: RwLock<HashMap<Uuid, Arc<Node>>>,
    links: RwLock<HashMap<Uuid, Arc<Link>>>,
    drawings: RwLock<HashMap<Uuid, Drawing>>,
    /// Occupancy map: which link holds each port. Claims are made here
    /// before any remote call so two links can never race for one port.
    pub(crate) bound_ports: Mutex<HashMap<PortKey, Uuid>>,
    pub(crate) hub: NotificationHub,
}

impl Project {
    pub(crate) fn new(id: Uuid, name: String, hub: NotificationHub) -> Self {
        Self {
            id,
            name,
            status: RwLock::new(ProjectStatus::Opened),
            nodes: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            drawings: RwLock::new(HashMap::new()),
            bound_ports: Mutex::new(HashMap::new()),
            hub,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProjectStatus {
        *self.status.read()
    }

    pub fn info(&self) -> ProjectInfo {
        ProjectInfo {
            project_id: self.id,
            name: self.name.clone(),
            status: self.status(),
        }
    }

    /// Topology mutations require an opened project.
    pub(crate) fn ensure_opened(&self) -> Result<()> {
        if self.status() == ProjectStatus::Opened {
            Ok(())
        } else {
            Err(ControllerError::Conflict(format!(
                "project {} is closed",
                self.id
            )))
        }
    }

    pub fn open(&self) -> ProjectInfo {
        *self.status.write() = ProjectStatus::Opened;
        let info = self.info();
        self.hub.publish(TopologyEvent::ProjectUpdated {
            project_id: self.id,
            payload: info.clone(),
        });
        info
    }

    /// Close the project: stop every node (failures are logged, never
    /// block the close) and mark it closed.
    pub async fn close(&self) -> ProjectInfo {
        let nodes: Vec<Arc<Node>> = self.nodes.read().values().cloned().collect();
        for node in nodes {
            if let Err(err) = node.stop().await {
                warn!(project = %self.id, node = %node.id(), error = %err,
                    "failed to stop node while closing project");
            }
        }
        *self.status.write() = ProjectStatus::Closed;
        let info = self.info();
        info!(project = %self.id, "project closed");
        self.hub.publish(TopologyEvent::ProjectClosed {
            project_id: self.id,
            payload: info.clone(),
        });
        info
    }

    /// Full teardown ahead of deletion: close, then remove links and nodes
    /// on their computes best-effort. Remote failures are logged and do not
    /// keep the project alive.
    pub(crate) async fn teardown(&self) {
        self.close().await;
        let link_ids: Vec<Uuid> = self.links.read().keys().copied().collect();
        for link_id in link_ids {
            if let Err(err) = self.delete_link(link_id).await {
                warn!(project = %self.id, link = %link_id, error = %err,
                    "failed to delete link during project teardown");
            }
        }
        let nodes: Vec<Arc<Node>> = self.nodes.read().values().cloned().collect();
        for node in nodes {
            if let Err(err) = node.prepare_delete().await {
                warn!(project = %self.id, node = %node.id(), error = %err,
                    "failed to delete node during project teardown");
            }
        }
        self.nodes.write().clear();
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Create a node record and materialize it on its compute. The record
    /// only becomes visible once the compute confirmed the creation.
    pub(crate) async fn add_node(
        &self,
        compute: Arc<ComputeHandle>,
        create: NodeCreate,
    ) -> Result<NodeInfo> {
        self.ensure_opened()?;
        let node_id = create.node_id.unwrap_or_else(Uuid::new_v4);
        {
            let nodes = self.nodes.read();
            if nodes.contains_key(&node_id) {
                return Err(ControllerError::Conflict(format!(
                    "node {} already exists",
                    node_id
                )));
            }
            if nodes.values().any(|n| n.info().name == create.name) {
                return Err(ControllerError::Conflict(format!(
                    "a node named {:?} already exists in project {}",
                    create.name, self.id
                )));
            }
        }
        let node = Arc::new(Node::new(
            node_id,
            self.id,
            compute.clone(),
            create.name,
            create.node_type,
            create.properties,
            self.hub.clone(),
        )?);
        // No record until the compute confirms.
        compute.api().create_node(self.id, &node.spec()).await?;
        let info = node.info();
        self.nodes.write().insert(node_id, node);
        info!(project = %self.id, node = %node_id, compute = %compute.id(), "node created");
        self.hub.publish(TopologyEvent::NodeCreated {
            project_id: self.id,
            compute_id: compute.id(),
            node_id,
            payload: info.clone(),
        });
        Ok(info)
    }

    pub fn get_node(&self, node_id: Uuid) -> Result<Arc<Node>> {
        self.nodes
            .read()
            .get(&node_id)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(EntityKind::Node, node_id))
    }

    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        let mut infos: Vec<NodeInfo> = self.nodes.read().values().map(|n| n.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Update a node record. A properties change re-derives the port list
    /// from the new adapter count; shrinking away a port a link still
    /// occupies is refused.
    pub fn update_node(&self, node_id: Uuid, update: NodeUpdate) -> Result<NodeInfo> {
        let node = self.get_node(node_id)?;
        let ports = match &update.properties {
            Some(properties) => {
                let ports = derive_ports(properties)?;
                let bound = self.bound_ports.lock();
                for (key, owner) in bound.iter().filter(|(key, _)| key.0 == node_id) {
                    let survives = ports
                        .iter()
                        .any(|p| p.adapter_number == key.1 && p.port_number == key.2);
                    if !survives {
                        return Err(ControllerError::Conflict(format!(
                            "port {}/{} of node {} is used by link {} and cannot be removed",
                            key.1, key.2, node_id, owner
                        )));
                    }
                }
                Some(ports)
            }
            None => None,
        };
        node.apply_update(update, ports);
        Ok(node.info())
    }

    /// Delete a node: detach its links, force it stopped, remove it on the
    /// compute, then drop the record. A failed stop or a compute error
    /// keeps the record, consistent with the last confirmed state.
    pub async fn delete_node(&self, node_id: Uuid) -> Result<()> {
        let node = self.get_node(node_id)?;

        let attached: Vec<Uuid> = self
            .links
            .read()
            .values()
            .filter(|l| l.involves_node(node_id))
            .map(|l| l.id())
            .collect();
        for link_id in attached {
            if let Err(err) = self.delete_link(link_id).await {
                warn!(project = %self.id, link = %link_id, error = %err,
                    "failed to delete link attached to node");
            }
        }

        node.prepare_delete().await?;
        self.nodes.write().remove(&node_id);
        info!(project = %self.id, node = %node_id, "node deleted");
        self.hub.publish(TopologyEvent::NodeDeleted {
            project_id: self.id,
            compute_id: node.compute().id(),
            node_id,
            payload: node.info(),
        });
        Ok(())
    }

    pub(crate) fn references_compute(&self, compute_id: Uuid) -> bool {
        self.nodes
            .read()
            .values()
            .any(|n| n.compute().id() == compute_id)
    }

    // ------------------------------------------------------------------
    // Batch lifecycle
    // ------------------------------------------------------------------

    /// Apply one lifecycle operation to every node. Per-node failures are
    /// collected and reported after the sweep; the batch never aborts early.
    async fn for_each_node<F, Fut>(&self, verb: &str, op: F) -> Result<()>
    where
        F: Fn(Arc<Node>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.ensure_opened()?;
        let nodes: Vec<Arc<Node>> = self.nodes.read().values().cloned().collect();
        let mut failures = Vec::new();
        for node in nodes {
            if let Err(err) = op(node.clone()).await {
                warn!(project = %self.id, node = %node.id(), error = %err,
                    "batch {verb} failed for node");
                failures.push(format!("{}: {}", node.id(), err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Conflict(format!(
                "{} failed for {} node(s): {}",
                verb,
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    pub async fn start_all(&self) -> Result<()> {
        // A node already started is fine in a batch.
        self.for_each_node("start", |node| async move {
            match node.start().await {
                Err(ControllerError::Conflict(_)) => Ok(()),
                other => other,
            }
        })
        .await
    }

    pub async fn stop_all(&self) -> Result<()> {
        self.for_each_node("stop", |node| async move { node.stop().await })
            .await
    }

    pub async fn suspend_all(&self) -> Result<()> {
        // Only running nodes on suspend-capable computes participate.
        self.for_each_node("suspend", |node| async move {
            match node.suspend().await {
                Err(ControllerError::Conflict(_)) | Err(ControllerError::Unsupported(_)) => Ok(()),
                other => other,
            }
        })
        .await
    }

    pub async fn reload_all(&self) -> Result<()> {
        self.for_each_node("reload", |node| async move {
            match node.reload().await {
                // Stopped nodes are skipped, not reloaded.
                Err(ControllerError::Conflict(msg)) if msg.contains("can be reloaded") => Ok(()),
                other => other,
            }
        })
        .await
    }

    // ------------------------------------------------------------------
    // Drawings
    // ------------------------------------------------------------------

    pub fn create_drawing(&self, create: DrawingCreate) -> Result<Drawing> {
        self.ensure_opened()?;
        let drawing_id = create.drawing_id.unwrap_or_else(Uuid::new_v4);
        if self.drawings.read().contains_key(&drawing_id) {
            return Err(ControllerError::Conflict(format!(
                "drawing {} already exists",
                drawing_id
            )));
        }
        let drawing = Drawing {
            drawing_id,
            project_id: self.id,
            svg: create.svg,
            x: create.x,
            y: create.y,
            z: create.z,
            rotation: create.rotation,
        };
        self.drawings.write().insert(drawing_id, drawing.clone());
        self.publish_project_updated();
        Ok(drawing)
    }

    pub fn get_drawing(&self, drawing_id: Uuid) -> Result<Drawing> {
        self.drawings
            .read()
            .get(&drawing_id)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(EntityKind::Drawing, drawing_id))
    }

    pub fn list_drawings(&self) -> Vec<Drawing> {
        self.drawings.read().values().cloned().collect()
    }

    pub fn update_drawing(&self, drawing_id: Uuid, update: DrawingUpdate) -> Result<Drawing> {
        let updated = {
            let mut drawings = self.drawings.write();
            let drawing = drawings
                .get_mut(&drawing_id)
                .ok_or_else(|| ControllerError::not_found(EntityKind::Drawing, drawing_id))?;
            if let Some(svg) = update.svg {
                drawing.svg = svg;
            }
            if let Some(x) = update.x {
                drawing.x = x;
            }
            if let Some(y) = update.y {
                drawing.y = y;
            }
            if let Some(z) = update.z {
                drawing.z = z;
            }
            if let Some(rotation) = update.rotation {
                drawing.rotation = rotation;
            }
            drawing.clone()
        };
        self.publish_project_updated();
        Ok(updated)
    }

    pub fn delete_drawing(&self, drawing_id: Uuid) -> Result<()> {
        self.drawings
            .write()
            .remove(&drawing_id)
            .ok_or_else(|| ControllerError::not_found(EntityKind::Drawing, drawing_id))?;
        self.publish_project_updated();
        Ok(())
    }

    fn publish_project_updated(&self) {
        self.hub.publish(TopologyEvent::ProjectUpdated {
            project_id: self.id,
            payload: self.info(),
        });
    }

    // ------------------------------------------------------------------
    // Link registry primitives (the link manager lives in `link.rs`)
    // ------------------------------------------------------------------

    pub fn get_link(&self, link_id: Uuid) -> Result<Arc<Link>> {
        self.links
            .read()
            .get(&link_id)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(EntityKind::Link, link_id))
    }

    pub fn list_links(&self) -> Vec<netloom_shared::LinkInfo> {
        self.links.read().values().map(|l| l.info()).collect()
    }

    pub(crate) fn insert_link(&self, link: Arc<Link>) {
        self.links.write().insert(link.id(), link);
    }

    pub(crate) fn remove_link(&self, link_id: Uuid) -> Option<Arc<Link>> {
        self.links.write().remove(&link_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::DEFAULT_QUEUE_CAPACITY;
    use crate::testutil::{mock_compute_handle, FailKind, MockCompute};
    use netloom_shared::NodeStatus;

    fn project_with_hub() -> (Arc<Project>, NotificationHub) {
        let hub = NotificationHub::new(DEFAULT_QUEUE_CAPACITY);
        let project = Arc::new(Project::new(Uuid::new_v4(), "lab".to_string(), hub.clone()));
        (project, hub)
    }

    fn node_create(compute_id: Uuid, name: &str) -> NodeCreate {
        NodeCreate {
            node_id: None,
            compute_id,
            name: name.to_string(),
            node_type: "qemu".to_string(),
            properties: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn failed_remote_create_leaves_no_record() {
        let (project, _hub) = project_with_hub();
        let mock = Arc::new(MockCompute::new());
        mock.fail_on("create_node", FailKind::Remote);
        let compute = mock_compute_handle(mock);

        let err = project
            .add_node(compute.clone(), node_create(compute.id(), "r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Compute(_)));
        assert!(project.list_nodes().is_empty());
    }

    #[tokio::test]
    async fn duplicate_node_name_is_a_conflict() {
        let (project, _hub) = project_with_hub();
        let compute = mock_compute_handle(Arc::new(MockCompute::new()));
        project
            .add_node(compute.clone(), node_create(compute.id(), "r1"))
            .await
            .unwrap();
        let err = project
            .add_node(compute.clone(), node_create(compute.id(), "r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert_eq!(project.list_nodes().len(), 1);
    }

    #[tokio::test]
    async fn closed_project_refuses_topology_mutations() {
        let (project, _hub) = project_with_hub();
        let compute = mock_compute_handle(Arc::new(MockCompute::new()));
        project.close().await;
        let err = project
            .add_node(compute.clone(), node_create(compute.id(), "r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
    }

    #[tokio::test]
    async fn close_stops_every_node() {
        let (project, _hub) = project_with_hub();
        let compute = mock_compute_handle(Arc::new(MockCompute::new()));
        let a = project
            .add_node(compute.clone(), node_create(compute.id(), "r1"))
            .await
            .unwrap();
        let b = project
            .add_node(compute.clone(), node_create(compute.id(), "r2"))
            .await
            .unwrap();
        project.get_node(a.node_id).unwrap().start().await.unwrap();
        project.get_node(b.node_id).unwrap().start().await.unwrap();

        project.close().await;
        assert_eq!(project.status(), ProjectStatus::Closed);
        assert_eq!(
            project.get_node(a.node_id).unwrap().status(),
            NodeStatus::Stopped
        );
        assert_eq!(
            project.get_node(b.node_id).unwrap().status(),
            NodeStatus::Stopped
        );
    }

    #[tokio::test]
    async fn delete_node_with_failing_stop_keeps_the_record() {
        let (project, _hub) = project_with_hub();
        let mock = Arc::new(MockCompute::new());
        let compute = mock_compute_handle(mock.clone());
        let info = project
            .add_node(compute.clone(), node_create(compute.id(), "r1"))
            .await
            .unwrap();
        project.get_node(info.node_id).unwrap().start().await.unwrap();

        mock.fail_on("stop_node", FailKind::Remote);
        let err = project.delete_node(info.node_id).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert!(project.get_node(info.node_id).is_ok());
    }

    #[tokio::test]
    async fn batch_start_continues_past_failures() {
        let (project, _hub) = project_with_hub();
        let mock = Arc::new(MockCompute::new());
        let compute = mock_compute_handle(mock.clone());
        let a = project
            .add_node(compute.clone(), node_create(compute.id(), "a"))
            .await
            .unwrap();
        let b = project
            .add_node(compute.clone(), node_create(compute.id(), "b"))
            .await
            .unwrap();

        mock.fail_once_on("start_node", FailKind::Remote);
        let err = project.start_all().await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        // One of the two started despite the other failing.
        let started = [a.node_id, b.node_id]
            .iter()
            .filter(|id| project.get_node(**id).unwrap().status() == NodeStatus::Started)
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn oversized_adapter_count_is_rejected_before_any_remote_call() {
        let (project, _hub) = project_with_hub();
        let mock = Arc::new(MockCompute::new());
        let compute = mock_compute_handle(mock.clone());
        let mut create = node_create(compute.id(), "r1");
        create
            .properties
            .insert("adapters".to_string(), serde_json::json!(1_000_000));

        let err = project.add_node(compute, create).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert!(mock.calls().iter().all(|c| !c.starts_with("create_node")));
        assert!(project.list_nodes().is_empty());
    }

    #[tokio::test]
    async fn properties_update_re_derives_the_port_list() {
        let (project, _hub) = project_with_hub();
        let compute = mock_compute_handle(Arc::new(MockCompute::new()));
        let mut create = node_create(compute.id(), "r1");
        create
            .properties
            .insert("adapters".to_string(), serde_json::json!(2));
        let info = project.add_node(compute, create).await.unwrap();
        assert_eq!(info.ports.len(), 2);

        let mut properties = serde_json::Map::new();
        properties.insert("adapters".to_string(), serde_json::json!(4));
        let updated = project
            .update_node(
                info.node_id,
                NodeUpdate {
                    name: None,
                    properties: Some(properties),
                },
            )
            .unwrap();
        assert_eq!(updated.ports.len(), 4);
        assert!(project.get_node(info.node_id).unwrap().has_port(3, 0));
    }

    #[tokio::test]
    async fn drawings_crud_round_trip() {
        let (project, _hub) = project_with_hub();
        let drawing = project
            .create_drawing(DrawingCreate {
                drawing_id: None,
                svg: "<svg/>".to_string(),
                x: 10,
                y: -5,
                z: 1,
                rotation: 0,
            })
            .unwrap();
        assert_eq!(project.list_drawings().len(), 1);

        let moved = project
            .update_drawing(
                drawing.drawing_id,
                DrawingUpdate {
                    x: Some(42),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.x, 42);
        assert_eq!(moved.svg, "<svg/>");

        project.delete_drawing(drawing.drawing_id).unwrap();
        assert!(project.get_drawing(drawing.drawing_id).is_err());
    }
}

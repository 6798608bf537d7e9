//! Controller façade: the compute registry, the project registry, and the
//! reachability probe loop.
//!
//! The controller is the single composition root. It owns every registered
//! compute and project, wires the notification hub through to entities, and
//! is the only place computes are registered or removed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use netloom_shared::compute::client::DEFAULT_TIMEOUT;
use netloom_shared::{
    Capabilities, ComputeApi, ComputeCreate, ComputeInfo, ComputeUpdate, ControllerError,
    EntityKind, HttpComputeClient, NodeCreate, NodeInfo, ProjectCreate, ProjectInfo, Result,
    TopologyEvent,
};

use crate::notify::NotificationHub;
use crate::project::Project;

// ============================================================================
// Compute Handle
// ============================================================================

/// A registered compute: its identity, its API client and the cached
/// reachability state maintained by the probe loop.
pub struct ComputeHandle {
    id: Uuid,
    meta: RwLock<ComputeMeta>,
    api: RwLock<Arc<dyn ComputeApi>>,
    /// When set, credential updates rebuild the HTTP client from `meta`.
    rebuild_http: bool,
    timeout: Duration,
    connected: AtomicBool,
    capabilities: RwLock<Option<Capabilities>>,
    last_probe: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Clone)]
struct ComputeMeta {
    name: String,
    scheme: String,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
}

impl ComputeMeta {
    fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl ComputeHandle {
    fn from_create(create: &ComputeCreate, id: Uuid, timeout: Duration) -> Result<Self> {
        let meta = ComputeMeta {
            name: create.name.clone(),
            scheme: create.scheme.clone(),
            host: create.host.clone(),
            port: create.port,
            user: create.user.clone(),
            password: create.password.clone(),
        };
        let client = HttpComputeClient::new(
            id,
            meta.base_url(),
            meta.user.clone(),
            meta.password.clone(),
            timeout,
        )?;
        Ok(Self {
            id,
            meta: RwLock::new(meta),
            api: RwLock::new(Arc::new(client)),
            rebuild_http: true,
            timeout,
            connected: AtomicBool::new(false),
            capabilities: RwLock::new(None),
            last_probe: RwLock::new(None),
        })
    }

    /// Wrap an arbitrary [`ComputeApi`] implementation. The endpoint address
    /// is cosmetic here; credential updates do not rebuild the client.
    pub fn from_api(id: Uuid, name: &str, host: &str, api: Arc<dyn ComputeApi>) -> Self {
        Self {
            id,
            meta: RwLock::new(ComputeMeta {
                name: name.to_string(),
                scheme: "http".to_string(),
                host: host.to_string(),
                port: 3080,
                user: None,
                password: None,
            }),
            api: RwLock::new(api),
            rebuild_http: false,
            timeout: DEFAULT_TIMEOUT,
            connected: AtomicBool::new(false),
            capabilities: RwLock::new(None),
            last_probe: RwLock::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    /// Address peers use to reach this compute, e.g. as a UDP tunnel
    /// remote host.
    pub fn host(&self) -> String {
        self.meta.read().host.clone()
    }

    pub fn api(&self) -> Arc<dyn ComputeApi> {
        self.api.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.read().clone()
    }

    pub fn supports_node_type(&self, node_type: &str) -> bool {
        self.capabilities()
            .map(|caps| caps.node_types.iter().any(|t| t == node_type))
            .unwrap_or(false)
    }

    pub fn info(&self) -> ComputeInfo {
        let meta = self.meta.read().clone();
        ComputeInfo {
            compute_id: self.id,
            name: meta.name,
            scheme: meta.scheme,
            host: meta.host,
            port: meta.port,
            user: meta.user,
            connected: self.is_connected(),
            capabilities: self.capabilities(),
            last_probe: *self.last_probe.read(),
        }
    }

    /// One reachability probe. Returns `true` when the `connected` flag
    /// changed, so the caller can publish `compute.updated` on edges only.
    pub async fn probe_once(&self) -> bool {
        let was_connected = self.is_connected();
        let outcome = self.api().probe().await;
        *self.last_probe.write() = Some(Utc::now());
        match outcome {
            Ok(caps) => {
                debug!(compute = %self.id, version = %caps.version, "compute probe ok");
                *self.capabilities.write() = Some(caps);
                self.connected.store(true, Ordering::Relaxed);
                !was_connected
            }
            Err(err) => {
                debug!(compute = %self.id, error = %err, "compute probe failed");
                self.connected.store(false, Ordering::Relaxed);
                was_connected
            }
        }
    }

    /// Seed reachability state without a probe round-trip.
    #[cfg(test)]
    pub(crate) fn force_capabilities(&self, caps: Capabilities) {
        *self.capabilities.write() = Some(caps);
        self.connected.store(true, Ordering::Relaxed);
    }

    fn apply_update(&self, update: ComputeUpdate) -> Result<()> {
        let meta = {
            let mut meta = self.meta.write();
            if let Some(name) = update.name {
                meta.name = name;
            }
            if let Some(user) = update.user {
                meta.user = Some(user);
            }
            if let Some(password) = update.password {
                meta.password = Some(password);
            }
            meta.clone()
        };
        if self.rebuild_http {
            let client = HttpComputeClient::new(
                self.id,
                meta.base_url(),
                meta.user,
                meta.password,
                self.timeout,
            )?;
            *self.api.write() = Arc::new(client);
        }
        Ok(())
    }
}

// ============================================================================
// Controller
// ============================================================================

/// The orchestration root: compute registry + project registry + hub.
pub struct Controller {
    computes: RwLock<HashMap<Uuid, Arc<ComputeHandle>>>,
    projects: RwLock<HashMap<Uuid, Arc<Project>>>,
    hub: NotificationHub,
    compute_timeout: Duration,
}

impl Controller {
    pub fn new(hub: NotificationHub, compute_timeout: Duration) -> Self {
        Self {
            computes: RwLock::new(HashMap::new()),
            projects: RwLock::new(HashMap::new()),
            hub,
            compute_timeout,
        }
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    // ------------------------------------------------------------------
    // Compute registry
    // ------------------------------------------------------------------

    /// Register a remote compute and probe it once.
    pub async fn add_compute(&self, create: ComputeCreate) -> Result<ComputeInfo> {
        let id = create.compute_id.unwrap_or_else(Uuid::new_v4);
        let handle = Arc::new(ComputeHandle::from_create(&create, id, self.compute_timeout)?);
        self.register_compute(handle).await
    }

    /// Register a compute backed by an arbitrary [`ComputeApi`]. This is the
    /// seam in-process tests drive the controller through.
    pub async fn add_compute_with_api(
        &self,
        id: Uuid,
        name: &str,
        host: &str,
        api: Arc<dyn ComputeApi>,
    ) -> Result<ComputeInfo> {
        let handle = Arc::new(ComputeHandle::from_api(id, name, host, api));
        self.register_compute(handle).await
    }

    async fn register_compute(&self, handle: Arc<ComputeHandle>) -> Result<ComputeInfo> {
        {
            let computes = self.computes.read();
            if computes.contains_key(&handle.id()) {
                return Err(ControllerError::Conflict(format!(
                    "compute {} is already registered",
                    handle.id()
                )));
            }
            let name = handle.name();
            if computes.values().any(|c| c.name() == name) {
                return Err(ControllerError::Conflict(format!(
                    "a compute named {:?} already exists",
                    name
                )));
            }
        }
        handle.probe_once().await;
        let info = handle.info();
        self.computes.write().insert(handle.id(), handle.clone());
        info!(compute = %handle.id(), connected = info.connected, "compute registered");
        self.hub.publish(TopologyEvent::ComputeCreated {
            compute_id: handle.id(),
            payload: info.clone(),
        });
        Ok(info)
    }

    pub fn get_compute(&self, id: Uuid) -> Result<Arc<ComputeHandle>> {
        self.computes
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(EntityKind::Compute, id))
    }

    pub fn list_computes(&self) -> Vec<ComputeInfo> {
        let mut infos: Vec<ComputeInfo> =
            self.computes.read().values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn update_compute(&self, id: Uuid, update: ComputeUpdate) -> Result<ComputeInfo> {
        let handle = self.get_compute(id)?;
        handle.apply_update(update)?;
        let info = handle.info();
        self.hub.publish(TopologyEvent::ComputeUpdated {
            compute_id: id,
            payload: info.clone(),
        });
        Ok(info)
    }

    /// Remove a compute. Refused while any node in any project is placed on
    /// it, so nodes can never dangle.
    pub fn delete_compute(&self, id: Uuid) -> Result<()> {
        let referenced = self
            .projects
            .read()
            .values()
            .any(|p| p.references_compute(id));
        if referenced {
            return Err(ControllerError::Conflict(format!(
                "compute {} still hosts nodes and cannot be removed",
                id
            )));
        }
        let handle = self
            .computes
            .write()
            .remove(&id)
            .ok_or_else(|| ControllerError::not_found(EntityKind::Compute, id))?;
        info!(compute = %id, "compute removed");
        self.hub.publish(TopologyEvent::ComputeDeleted {
            compute_id: id,
            payload: handle.info(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Project registry
    // ------------------------------------------------------------------

    /// Create a project; it starts out opened.
    pub fn create_project(&self, create: ProjectCreate) -> Result<ProjectInfo> {
        let id = create.project_id.unwrap_or_else(Uuid::new_v4);
        {
            let projects = self.projects.read();
            if projects.contains_key(&id) {
                return Err(ControllerError::Conflict(format!(
                    "project {} already exists",
                    id
                )));
            }
            if projects.values().any(|p| p.name() == create.name) {
                return Err(ControllerError::Conflict(format!(
                    "a project named {:?} already exists",
                    create.name
                )));
            }
        }
        let project = Arc::new(Project::new(id, create.name, self.hub.clone()));
        let info = project.info();
        self.projects.write().insert(id, project);
        info!(project = %id, name = %info.name, "project created");
        self.hub.publish(TopologyEvent::ProjectUpdated {
            project_id: id,
            payload: info.clone(),
        });
        Ok(info)
    }

    pub fn get_project(&self, id: Uuid) -> Result<Arc<Project>> {
        self.projects
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(EntityKind::Project, id))
    }

    pub fn list_projects(&self) -> Vec<ProjectInfo> {
        let mut infos: Vec<ProjectInfo> =
            self.projects.read().values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Delete a project: close it (stopping every node), tear down its
    /// remote state best-effort, then drop the record.
    pub async fn delete_project(&self, id: Uuid) -> Result<()> {
        let project = self.get_project(id)?;
        project.teardown().await;
        self.projects.write().remove(&id);
        info!(project = %id, "project deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Node placement
    // ------------------------------------------------------------------

    /// Create a node inside a project, placed on the given compute. The
    /// compute binding is permanent for the node's life.
    pub async fn create_node(&self, project_id: Uuid, create: NodeCreate) -> Result<NodeInfo> {
        let project = self.get_project(project_id)?;
        let compute = self.get_compute(create.compute_id)?;
        if let Some(caps) = compute.capabilities() {
            if !caps.node_types.iter().any(|t| t == &create.node_type) {
                return Err(ControllerError::Unsupported(format!(
                    "compute {} does not support node type {:?}",
                    compute.id(),
                    create.node_type
                )));
            }
        }
        project.add_node(compute, create).await
    }

    // ------------------------------------------------------------------
    // Probe loop
    // ------------------------------------------------------------------

    /// One probe sweep over all registered computes. Publishes
    /// `compute.updated` for every compute whose reachability flipped.
    pub async fn probe_all(&self) {
        let handles: Vec<Arc<ComputeHandle>> =
            self.computes.read().values().cloned().collect();
        for handle in handles {
            if handle.probe_once().await {
                let info = handle.info();
                if info.connected {
                    info!(compute = %handle.id(), "compute is reachable");
                } else {
                    warn!(compute = %handle.id(), "compute became unreachable");
                }
                self.hub.publish(TopologyEvent::ComputeUpdated {
                    compute_id: handle.id(),
                    payload: info,
                });
            }
        }
    }

    /// Spawn the periodic reachability probe loop.
    pub fn spawn_probe_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                controller.probe_all().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::DEFAULT_QUEUE_CAPACITY;
    use crate::testutil::{FailKind, MockCompute};

    fn controller() -> Controller {
        Controller::new(NotificationHub::new(DEFAULT_QUEUE_CAPACITY), DEFAULT_TIMEOUT)
    }

    async fn with_mock(controller: &Controller, name: &str) -> (Uuid, Arc<MockCompute>) {
        let mock = Arc::new(MockCompute::new());
        let id = Uuid::new_v4();
        controller
            .add_compute_with_api(id, name, "10.0.0.5", mock.clone())
            .await
            .unwrap();
        (id, mock)
    }

    #[tokio::test]
    async fn register_probes_and_reports_connected() {
        let controller = controller();
        let (id, _mock) = with_mock(&controller, "lab-1").await;

        let info = controller.get_compute(id).unwrap().info();
        assert!(info.connected);
        assert!(info.capabilities.is_some());
        assert!(info.last_probe.is_some());
    }

    #[tokio::test]
    async fn duplicate_compute_name_is_a_conflict() {
        let controller = controller();
        with_mock(&controller, "lab-1").await;
        let err = controller
            .add_compute_with_api(
                Uuid::new_v4(),
                "lab-1",
                "10.0.0.6",
                Arc::new(MockCompute::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_compute_is_not_found() {
        let controller = controller();
        assert!(matches!(
            controller.get_compute(Uuid::new_v4()),
            Err(ControllerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn probe_publishes_only_on_reachability_edges() {
        let controller = controller();
        let (_, mock) = with_mock(&controller, "lab-1").await;

        let queue = controller.hub().subscribe();
        // Still reachable: no edge, no event.
        controller.probe_all().await;
        assert!(queue.recv(Duration::from_millis(20)).await.is_none());

        mock.fail_on("probe", FailKind::Unreachable);
        controller.probe_all().await;
        let event = queue.recv(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event.kind(), "compute.updated");
    }

    #[tokio::test]
    async fn delete_compute_with_nodes_is_refused() {
        let controller = controller();
        let (compute_id, _) = with_mock(&controller, "lab-1").await;
        let project = controller
            .create_project(ProjectCreate {
                project_id: None,
                name: "lab".to_string(),
            })
            .unwrap();
        controller
            .create_node(
                project.project_id,
                NodeCreate {
                    node_id: None,
                    compute_id,
                    name: "r1".to_string(),
                    node_type: "qemu".to_string(),
                    properties: serde_json::Map::new(),
                },
            )
            .await
            .unwrap();

        let err = controller.delete_compute(compute_id).unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert!(controller.get_compute(compute_id).is_ok());
    }

    #[tokio::test]
    async fn unsupported_node_type_is_refused_before_any_remote_call() {
        let controller = controller();
        let (compute_id, mock) = with_mock(&controller, "lab-1").await;
        let project = controller
            .create_project(ProjectCreate {
                project_id: None,
                name: "lab".to_string(),
            })
            .unwrap();

        let err = controller
            .create_node(
                project.project_id,
                NodeCreate {
                    node_id: None,
                    compute_id,
                    name: "sw1".to_string(),
                    node_type: "iou".to_string(),
                    properties: serde_json::Map::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Unsupported(_)));
        assert!(mock.calls().iter().all(|c| !c.starts_with("create_node")));
    }

    #[tokio::test]
    async fn duplicate_project_name_is_a_conflict() {
        let controller = controller();
        controller
            .create_project(ProjectCreate {
                project_id: None,
                name: "lab".to_string(),
            })
            .unwrap();
        let err = controller
            .create_project(ProjectCreate {
                project_id: None,
                name: "lab".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
    }

    #[tokio::test]
    async fn compute_update_renames_without_touching_reachability() {
        let controller = controller();
        let (id, _) = with_mock(&controller, "lab-1").await;
        let info = controller
            .update_compute(
                id,
                ComputeUpdate {
                    name: Some("lab-renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(info.name, "lab-renamed");
        assert!(info.connected);
    }
}

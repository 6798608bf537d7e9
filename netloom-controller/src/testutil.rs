//! In-process test double for the compute capability surface.
//!
//! `MockCompute` records every call it receives and can be scripted to
//! fail specific operations, so tests can drive the orchestration core
//! through partial-failure paths without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use netloom_shared::compute::{CaptureSpec, ComputeApi, NioSpec, NodeSpec, UdpAllocation};
use netloom_shared::{Capabilities, ControllerError, Result};

use crate::controller::ComputeHandle;

/// How a scripted operation fails.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FailKind {
    Timeout,
    Unreachable,
    Conflict,
    Remote,
}

pub(crate) struct MockCompute {
    id: Uuid,
    caps: Capabilities,
    calls: Mutex<Vec<String>>,
    fail: Mutex<HashMap<String, FailKind>>,
    fail_once: Mutex<HashMap<String, FailKind>>,
    next_port: AtomicU16,
    allocated: Mutex<Vec<u16>>,
    released: Mutex<Vec<u16>>,
    last_nio: Mutex<Option<NioSpec>>,
}

impl MockCompute {
    pub(crate) fn new() -> Self {
        Self::with_capabilities(Capabilities {
            node_types: vec!["qemu".to_string(), "docker".to_string()],
            platform: "linux".to_string(),
            version: "3.0.0".to_string(),
            cpus: 8,
            memory_mb: 16384,
            suspend: true,
            atomic_reload: false,
        })
    }

    pub(crate) fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            id: Uuid::new_v4(),
            caps,
            calls: Mutex::new(Vec::new()),
            fail: Mutex::new(HashMap::new()),
            fail_once: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(20000),
            allocated: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            last_nio: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.caps.clone()
    }

    /// Fail every future call to `op`.
    pub(crate) fn fail_on(&self, op: &str, kind: FailKind) {
        self.fail.lock().insert(op.to_string(), kind);
    }

    /// Fail only the next call to `op`.
    pub(crate) fn fail_once_on(&self, op: &str, kind: FailKind) {
        self.fail_once.lock().insert(op.to_string(), kind);
    }

    pub(crate) fn clear_failures(&self) {
        self.fail.lock().clear();
        self.fail_once.lock().clear();
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn allocated(&self) -> Vec<u16> {
        self.allocated.lock().clone()
    }

    pub(crate) fn released(&self) -> Vec<u16> {
        let mut ports = self.released.lock().clone();
        ports.sort_unstable();
        ports
    }

    /// The NIO spec of the most recent port binding.
    pub(crate) fn last_nio(&self) -> Option<NioSpec> {
        self.last_nio.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn maybe_fail(&self, op: &str) -> Result<()> {
        let kind = match self.fail_once.lock().remove(op) {
            Some(kind) => Some(kind),
            None => self.fail.lock().get(op).copied(),
        };
        match kind {
            None => Ok(()),
            Some(FailKind::Timeout) => Err(ControllerError::Timeout {
                compute_id: self.id,
                elapsed: Duration::from_secs(20),
            }),
            Some(FailKind::Unreachable) => Err(ControllerError::Unreachable {
                compute_id: self.id,
                reason: "connection refused".to_string(),
            }),
            Some(FailKind::Conflict) => {
                Err(ControllerError::Conflict("simulated conflict".to_string()))
            }
            Some(FailKind::Remote) => Err(ControllerError::Compute(
                "simulated compute failure".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ComputeApi for MockCompute {
    async fn probe(&self) -> Result<Capabilities> {
        self.record("probe".to_string());
        self.maybe_fail("probe")?;
        Ok(self.caps.clone())
    }

    async fn create_node(&self, _project_id: Uuid, spec: &NodeSpec) -> Result<()> {
        self.record(format!("create_node {}", spec.node_id));
        self.maybe_fail("create_node")
    }

    async fn delete_node(&self, _project_id: Uuid, _node_type: &str, node_id: Uuid) -> Result<()> {
        self.record(format!("delete_node {}", node_id));
        self.maybe_fail("delete_node")
    }

    async fn start_node(&self, _project_id: Uuid, _node_type: &str, node_id: Uuid) -> Result<()> {
        self.record(format!("start_node {}", node_id));
        self.maybe_fail("start_node")
    }

    async fn stop_node(&self, _project_id: Uuid, _node_type: &str, node_id: Uuid) -> Result<()> {
        self.record(format!("stop_node {}", node_id));
        self.maybe_fail("stop_node")
    }

    async fn suspend_node(&self, _project_id: Uuid, _node_type: &str, node_id: Uuid) -> Result<()> {
        self.record(format!("suspend_node {}", node_id));
        self.maybe_fail("suspend_node")
    }

    async fn resume_node(&self, _project_id: Uuid, _node_type: &str, node_id: Uuid) -> Result<()> {
        self.record(format!("resume_node {}", node_id));
        self.maybe_fail("resume_node")
    }

    async fn reload_node(&self, _project_id: Uuid, _node_type: &str, node_id: Uuid) -> Result<()> {
        self.record(format!("reload_node {}", node_id));
        self.maybe_fail("reload_node")
    }

    async fn allocate_udp_port(&self, _project_id: Uuid) -> Result<UdpAllocation> {
        self.record("allocate_udp_port".to_string());
        self.maybe_fail("allocate_udp_port")?;
        let lport = self.next_port.fetch_add(1, Ordering::Relaxed);
        self.allocated.lock().push(lport);
        Ok(UdpAllocation {
            lport,
            token: format!("tok-{}", lport),
        })
    }

    async fn release_udp_port(&self, _project_id: Uuid, allocation: &UdpAllocation) -> Result<()> {
        self.record(format!("release_udp_port {}", allocation.lport));
        self.maybe_fail("release_udp_port")?;
        self.released.lock().push(allocation.lport);
        Ok(())
    }

    async fn add_port_binding(
        &self,
        _project_id: Uuid,
        _node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
        nio: &NioSpec,
    ) -> Result<()> {
        self.record(format!(
            "add_port_binding {}/{}/{}",
            node_id, adapter_number, port_number
        ));
        self.maybe_fail("add_port_binding")?;
        *self.last_nio.lock() = Some(nio.clone());
        Ok(())
    }

    async fn remove_port_binding(
        &self,
        _project_id: Uuid,
        _node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> Result<()> {
        self.record(format!(
            "remove_port_binding {}/{}/{}",
            node_id, adapter_number, port_number
        ));
        self.maybe_fail("remove_port_binding")
    }

    async fn start_capture(
        &self,
        _project_id: Uuid,
        _node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
        capture: &CaptureSpec,
    ) -> Result<()> {
        self.record(format!(
            "start_capture {}/{}/{} {}",
            node_id, adapter_number, port_number, capture.file_name
        ));
        self.maybe_fail("start_capture")
    }

    async fn stop_capture(
        &self,
        _project_id: Uuid,
        _node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> Result<()> {
        self.record(format!(
            "stop_capture {}/{}/{}",
            node_id, adapter_number, port_number
        ));
        self.maybe_fail("stop_capture")
    }
}

/// A registered-looking compute handle backed by the mock, with its
/// capabilities already cached as if a probe had succeeded.
pub(crate) fn mock_compute_handle(mock: Arc<MockCompute>) -> Arc<ComputeHandle> {
    let caps = mock.capabilities();
    let handle = Arc::new(ComputeHandle::from_api(
        mock.id(),
        "mock",
        "10.0.0.9",
        mock,
    ));
    handle.force_capabilities(caps);
    handle
}

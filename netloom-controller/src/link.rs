//! Link manager: NIO wiring between node ports.
//!
//! A link is a logical point-to-point connection between two ports,
//! realized as either a compute-internal bridge (both ports on one
//! compute) or a cross-compute UDP tunnel. Port claims are taken in the
//! project occupancy map before any remote call; every partial wiring
//! failure unwinds the remote side and releases the claims.
//!
//! Deletion is best-effort: an unreachable compute cannot block a link
//! from being removed from the topology, the leaked remote binding is
//! logged for operator cleanup.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use netloom_shared::compute::{CaptureSpec, NioSpec, UdpAllocation};
use netloom_shared::{
    CaptureDescriptor, CaptureStart, ControllerError, LinkCreate, LinkEndpoint, LinkInfo,
    LinkUpdate, NioDescriptor, NodeStatus, PacketFilters, Result, TopologyEvent, UdpTunnelEnd,
};

use crate::node::Node;
use crate::project::{PortKey, Project};

// ============================================================================
// Link Entity
// ============================================================================

pub struct Link {
    id: Uuid,
    project_id: Uuid,
    endpoints: [LinkEndpoint; 2],
    nio: RwLock<Option<NioDescriptor>>,
    capture: RwLock<Option<CaptureDescriptor>>,
    filters: RwLock<PacketFilters>,
    suspended: AtomicBool,
    /// Entity-scoped advisory lock for wiring/capture transitions.
    lock: Mutex<()>,
}

impl Link {
    fn new(
        id: Uuid,
        project_id: Uuid,
        endpoints: [LinkEndpoint; 2],
        nio: NioDescriptor,
        filters: PacketFilters,
    ) -> Self {
        Self {
            id,
            project_id,
            endpoints,
            nio: RwLock::new(Some(nio)),
            capture: RwLock::new(None),
            filters: RwLock::new(filters),
            suspended: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoints(&self) -> &[LinkEndpoint; 2] {
        &self.endpoints
    }

    pub fn involves_node(&self, node_id: Uuid) -> bool {
        self.endpoints.iter().any(|e| e.node_id == node_id)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> LinkInfo {
        LinkInfo {
            link_id: self.id,
            project_id: self.project_id,
            endpoints: self.endpoints.to_vec(),
            nio: self.nio.read().clone(),
            capture: self.capture.read().clone(),
            filters: self.filters.read().clone(),
            suspended: self.is_suspended(),
        }
    }

    /// Filters pushed to the computes. While suspended every frame is
    /// dropped, regardless of the configured filters.
    fn effective_filters(&self) -> PacketFilters {
        let mut filters = self.filters.read().clone();
        if self.is_suspended() {
            filters.insert("frequency_drop".to_string(), vec![serde_json::json!(-1)]);
        }
        filters
    }

    /// The NIO binding spec for one endpoint, derived from the stored
    /// descriptor and the current effective filters.
    fn endpoint_nio(&self, index: usize) -> Result<NioSpec> {
        let nio = self.nio.read().clone().ok_or_else(|| {
            ControllerError::Conflict(format!("link {} has no transport wired", self.id))
        })?;
        let filters = self.effective_filters();
        Ok(match nio {
            NioDescriptor::UdpTunnel { ends } => {
                let end = &ends[index];
                NioSpec::Udp {
                    lport: end.lport,
                    rhost: end.rhost.clone(),
                    rport: end.rport,
                    filters,
                }
            }
            NioDescriptor::InternalBridge { bridge_name, .. } => NioSpec::Bridge {
                bridge_name,
                filters,
            },
            NioDescriptor::Tap { device, .. } => NioSpec::Tap { device },
        })
    }
}

// ============================================================================
// Link Manager
// ============================================================================

struct ResolvedEndpoint {
    endpoint: LinkEndpoint,
    node: Arc<Node>,
}

impl Project {
    /// Create a point-to-point link between two node ports.
    ///
    /// Both ports are claimed in the occupancy map before the first remote
    /// call. Cross-compute links allocate both UDP listen ports before
    /// either side is bound; any later failure releases the allocations
    /// and removes partial bindings, so a failed creation leaves nothing
    /// behind.
    pub async fn create_link(&self, create: LinkCreate) -> Result<LinkInfo> {
        self.ensure_opened()?;
        let link_id = create.link_id.unwrap_or_else(Uuid::new_v4);
        if self.get_link(link_id).is_ok() {
            return Err(ControllerError::Conflict(format!(
                "link {} already exists",
                link_id
            )));
        }

        let [a, b] = self.resolve_endpoints(&create.endpoints)?;

        // Claim both ports atomically; released on any later failure.
        let keys = [port_key(&a.endpoint), port_key(&b.endpoint)];
        self.claim_ports(link_id, &keys)?;

        let wired = if a.node.compute().id() == b.node.compute().id() {
            self.wire_bridge(link_id, &a, &b, &create.filters).await
        } else {
            self.wire_udp_tunnel(link_id, &a, &b, &create.filters).await
        };
        let nio = match wired {
            Ok(nio) => nio,
            Err(err) => {
                self.release_ports(&keys);
                return Err(err);
            }
        };

        let link = Arc::new(Link::new(
            link_id,
            self.id(),
            [a.endpoint, b.endpoint],
            nio,
            create.filters,
        ));
        let info = link.info();
        self.insert_link(link);
        info!(project = %self.id(), link = %link_id, "link created");
        self.hub.publish(TopologyEvent::LinkCreated {
            project_id: self.id(),
            link_id,
            payload: info.clone(),
        });
        Ok(info)
    }

    fn resolve_endpoints(&self, endpoints: &[LinkEndpoint]) -> Result<[ResolvedEndpoint; 2]> {
        let [a, b]: &[LinkEndpoint; 2] = endpoints.try_into().map_err(|_| {
            ControllerError::Conflict(format!(
                "a point-to-point link requires exactly 2 endpoints, got {}",
                endpoints.len()
            ))
        })?;
        if port_key(a) == port_key(b) {
            return Err(ControllerError::Conflict(
                "both link endpoints reference the same port".to_string(),
            ));
        }
        let mut resolved = Vec::with_capacity(2);
        for endpoint in [a, b] {
            let node = self.get_node(endpoint.node_id)?;
            if !node.has_port(endpoint.adapter_number, endpoint.port_number) {
                return Err(ControllerError::not_found(
                    netloom_shared::EntityKind::Port,
                    format!(
                        "{}/{}/{}",
                        endpoint.node_id, endpoint.adapter_number, endpoint.port_number
                    ),
                ));
            }
            if !node.compute().is_connected() {
                return Err(ControllerError::Unreachable {
                    compute_id: node.compute().id(),
                    reason: "link creation requires a reachable compute".to_string(),
                });
            }
            resolved.push(ResolvedEndpoint {
                endpoint: endpoint.clone(),
                node,
            });
        }
        let b = resolved.pop().unwrap_or_else(|| unreachable!());
        let a = resolved.pop().unwrap_or_else(|| unreachable!());
        Ok([a, b])
    }

    fn claim_ports(&self, link_id: Uuid, keys: &[PortKey; 2]) -> Result<()> {
        let mut bound = self.bound_ports.lock();
        for key in keys {
            if let Some(owner) = bound.get(key) {
                return Err(ControllerError::Conflict(format!(
                    "port {}/{}/{} is already used by link {}",
                    key.0, key.1, key.2, owner
                )));
            }
        }
        for key in keys {
            bound.insert(*key, link_id);
        }
        Ok(())
    }

    fn release_ports(&self, keys: &[PortKey; 2]) {
        let mut bound = self.bound_ports.lock();
        for key in keys {
            bound.remove(key);
        }
    }

    /// Wire both ports to a compute-internal bridge.
    async fn wire_bridge(
        &self,
        link_id: Uuid,
        a: &ResolvedEndpoint,
        b: &ResolvedEndpoint,
        filters: &PacketFilters,
    ) -> Result<NioDescriptor> {
        let compute = a.node.compute();
        let bridge_name = format!("link-{}", link_id);
        let spec = NioSpec::Bridge {
            bridge_name: bridge_name.clone(),
            filters: filters.clone(),
        };

        bind_endpoint(a, &spec).await?;
        if let Err(err) = bind_endpoint(b, &spec).await {
            unwind_binding(a).await;
            return Err(err);
        }
        Ok(NioDescriptor::InternalBridge {
            compute_id: compute.id(),
            bridge_name,
        })
    }

    /// Wire a cross-compute UDP tunnel. Both listen ports are allocated
    /// up front so neither side is ever bound to a port that does not
    /// exist on the peer.
    async fn wire_udp_tunnel(
        &self,
        link_id: Uuid,
        a: &ResolvedEndpoint,
        b: &ResolvedEndpoint,
        filters: &PacketFilters,
    ) -> Result<NioDescriptor> {
        let project_id = self.id();
        let compute_a = a.node.compute();
        let compute_b = b.node.compute();

        let alloc_a = compute_a.api().allocate_udp_port(project_id).await?;
        let alloc_b = match compute_b.api().allocate_udp_port(project_id).await {
            Ok(alloc) => alloc,
            Err(err) => {
                release_allocation(project_id, a, &alloc_a).await;
                return Err(err);
            }
        };

        let spec_a = NioSpec::Udp {
            lport: alloc_a.lport,
            rhost: compute_b.host(),
            rport: alloc_b.lport,
            filters: filters.clone(),
        };
        let spec_b = NioSpec::Udp {
            lport: alloc_b.lport,
            rhost: compute_a.host(),
            rport: alloc_a.lport,
            filters: filters.clone(),
        };

        if let Err(err) = bind_endpoint(a, &spec_a).await {
            release_allocation(project_id, a, &alloc_a).await;
            release_allocation(project_id, b, &alloc_b).await;
            return Err(err);
        }
        if let Err(err) = bind_endpoint(b, &spec_b).await {
            unwind_binding(a).await;
            release_allocation(project_id, a, &alloc_a).await;
            release_allocation(project_id, b, &alloc_b).await;
            return Err(err);
        }

        info!(link = %link_id, lport_a = alloc_a.lport, lport_b = alloc_b.lport,
            "UDP tunnel established");
        Ok(NioDescriptor::UdpTunnel {
            ends: [
                UdpTunnelEnd {
                    compute_id: compute_a.id(),
                    lport: alloc_a.lport,
                    rhost: compute_b.host(),
                    rport: alloc_b.lport,
                    token: alloc_a.token,
                },
                UdpTunnelEnd {
                    compute_id: compute_b.id(),
                    lport: alloc_b.lport,
                    rhost: compute_a.host(),
                    rport: alloc_a.lport,
                    token: alloc_b.token,
                },
            ],
        })
    }

    /// Delete a link. Remote teardown is best-effort: a compute that is
    /// down cannot block the deletion, the orphaned binding is logged.
    pub async fn delete_link(&self, link_id: Uuid) -> Result<()> {
        let link = self.get_link(link_id)?;
        let _guard = link.lock.lock().await;
        // A concurrent delete may have won the lock first; the loser must
        // see NotFound, not tear the link down a second time.
        self.get_link(link_id)?;

        if link.capture.read().is_some() {
            if let Err(err) = self.remote_stop_capture(&link).await {
                warn!(link = %link_id, error = %err, "failed to stop capture during link deletion");
            }
        }

        // Unbind in reverse creation order, then release tunnel ports.
        for index in [1usize, 0] {
            let endpoint = &link.endpoints()[index];
            match self.get_node(endpoint.node_id) {
                Ok(node) => {
                    let resolved = ResolvedEndpoint {
                        endpoint: endpoint.clone(),
                        node,
                    };
                    if let Err(err) = unbind_endpoint(&resolved).await {
                        warn!(link = %link_id, node = %endpoint.node_id, error = %err,
                            "orphaned NIO binding left on compute");
                    }
                }
                Err(_) => {
                    // The node is already gone along with its bindings.
                }
            }
        }
        // Clone out of the lock before awaiting anything below.
        let nio = link.nio.read().clone();
        if let Some(NioDescriptor::UdpTunnel { ends }) = nio {
            for (index, end) in ends.iter().enumerate() {
                let endpoint = &link.endpoints()[index];
                if let Ok(node) = self.get_node(endpoint.node_id) {
                    let allocation = UdpAllocation {
                        lport: end.lport,
                        token: end.token.clone(),
                    };
                    if let Err(err) = node
                        .compute()
                        .api()
                        .release_udp_port(self.id(), &allocation)
                        .await
                    {
                        warn!(link = %link_id, lport = end.lport, error = %err,
                            "orphaned UDP allocation left on compute");
                    }
                }
            }
        }

        self.remove_link(link_id);
        let keys = [
            port_key(&link.endpoints()[0]),
            port_key(&link.endpoints()[1]),
        ];
        self.release_ports(&keys);
        info!(project = %self.id(), link = %link_id, "link deleted");
        self.hub.publish(TopologyEvent::LinkDeleted {
            project_id: self.id(),
            link_id,
            payload: link.info(),
        });
        Ok(())
    }

    /// Update filters and/or the filter-level suspend flag, re-applying
    /// the bindings so live traffic reflects the change.
    pub async fn update_link(&self, link_id: Uuid, update: LinkUpdate) -> Result<LinkInfo> {
        let link = self.get_link(link_id)?;
        let _guard = link.lock.lock().await;

        if let Some(filters) = update.filters {
            *link.filters.write() = filters;
        }
        if let Some(suspend) = update.suspend {
            link.suspended.store(suspend, Ordering::Relaxed);
        }
        self.reapply_bindings(&link).await?;

        let info = link.info();
        self.hub.publish(TopologyEvent::LinkUpdated {
            project_id: self.id(),
            link_id,
            payload: info.clone(),
        });
        Ok(info)
    }

    /// Re-wire both endpoints from the stored descriptor: unbind then
    /// bind again. Used to recover a link whose compute-side state has
    /// drifted.
    pub async fn reset_link(&self, link_id: Uuid) -> Result<LinkInfo> {
        let link = self.get_link(link_id)?;
        let _guard = link.lock.lock().await;

        for index in 0..2 {
            let resolved = self.resolve_link_endpoint(&link, index)?;
            if let Err(err) = unbind_endpoint(&resolved).await {
                warn!(link = %link_id, error = %err, "unbind failed during link reset");
            }
            let spec = link.endpoint_nio(index)?;
            bind_endpoint(&resolved, &spec).await?;
        }
        info!(link = %link_id, "link reset");
        Ok(link.info())
    }

    async fn reapply_bindings(&self, link: &Arc<Link>) -> Result<()> {
        for index in 0..2 {
            let resolved = self.resolve_link_endpoint(link, index)?;
            let spec = link.endpoint_nio(index)?;
            bind_endpoint(&resolved, &spec).await?;
        }
        Ok(())
    }

    fn resolve_link_endpoint(&self, link: &Arc<Link>, index: usize) -> Result<ResolvedEndpoint> {
        let endpoint = link.endpoints()[index].clone();
        let node = self.get_node(endpoint.node_id)?;
        Ok(ResolvedEndpoint { endpoint, node })
    }

    // ------------------------------------------------------------------
    // Packet capture
    // ------------------------------------------------------------------

    /// Start a packet capture on the link. The capture taps the first
    /// endpoint, whose node must be started.
    pub async fn start_capture(&self, link_id: Uuid, start: CaptureStart) -> Result<LinkInfo> {
        let link = self.get_link(link_id)?;
        let _guard = link.lock.lock().await;

        if link.capture.read().is_some() {
            return Err(ControllerError::Conflict(format!(
                "a capture is already running on link {}",
                link_id
            )));
        }
        let resolved = self.resolve_link_endpoint(&link, 0)?;
        if resolved.node.status() != NodeStatus::Started {
            return Err(ControllerError::Conflict(format!(
                "capture on link {} requires node {} to be started",
                link_id,
                resolved.node.id()
            )));
        }

        let file_name = start
            .capture_file_name
            .unwrap_or_else(|| format!("link-{}.pcap", link_id));
        let spec = CaptureSpec {
            file_name: file_name.clone(),
            data_link_type: start.data_link_type.clone(),
        };
        resolved
            .node
            .compute()
            .api()
            .start_capture(
                self.id(),
                resolved.node.node_type(),
                resolved.node.id(),
                resolved.endpoint.adapter_number,
                resolved.endpoint.port_number,
                &spec,
            )
            .await?;

        *link.capture.write() = Some(CaptureDescriptor {
            file_name,
            data_link_type: start.data_link_type,
        });
        info!(link = %link_id, "capture started");
        let info = link.info();
        self.hub.publish(TopologyEvent::LinkUpdated {
            project_id: self.id(),
            link_id,
            payload: info.clone(),
        });
        Ok(info)
    }

    /// Stop the running capture on the link.
    pub async fn stop_capture(&self, link_id: Uuid) -> Result<LinkInfo> {
        let link = self.get_link(link_id)?;
        let _guard = link.lock.lock().await;

        if link.capture.read().is_none() {
            return Err(ControllerError::Conflict(format!(
                "no capture is running on link {}",
                link_id
            )));
        }
        self.remote_stop_capture(&link).await?;
        *link.capture.write() = None;
        info!(link = %link_id, "capture stopped");
        let info = link.info();
        self.hub.publish(TopologyEvent::LinkUpdated {
            project_id: self.id(),
            link_id,
            payload: info.clone(),
        });
        Ok(info)
    }

    async fn remote_stop_capture(&self, link: &Arc<Link>) -> Result<()> {
        let resolved = self.resolve_link_endpoint(link, 0)?;
        resolved
            .node
            .compute()
            .api()
            .stop_capture(
                self.id(),
                resolved.node.node_type(),
                resolved.node.id(),
                resolved.endpoint.adapter_number,
                resolved.endpoint.port_number,
            )
            .await
    }
}

fn port_key(endpoint: &LinkEndpoint) -> PortKey {
    (
        endpoint.node_id,
        endpoint.adapter_number,
        endpoint.port_number,
    )
}

async fn bind_endpoint(resolved: &ResolvedEndpoint, spec: &NioSpec) -> Result<()> {
    resolved
        .node
        .compute()
        .api()
        .add_port_binding(
            resolved.node.project_id(),
            resolved.node.node_type(),
            resolved.node.id(),
            resolved.endpoint.adapter_number,
            resolved.endpoint.port_number,
            spec,
        )
        .await
}

async fn unbind_endpoint(resolved: &ResolvedEndpoint) -> Result<()> {
    resolved
        .node
        .compute()
        .api()
        .remove_port_binding(
            resolved.node.project_id(),
            resolved.node.node_type(),
            resolved.node.id(),
            resolved.endpoint.adapter_number,
            resolved.endpoint.port_number,
        )
        .await
}

/// Best-effort rollback of one binding during a failed creation.
async fn unwind_binding(resolved: &ResolvedEndpoint) {
    if let Err(err) = unbind_endpoint(resolved).await {
        warn!(node = %resolved.node.id(), error = %err,
            "failed to roll back NIO binding, orphan left on compute");
    }
}

/// Best-effort release of one UDP allocation during a failed creation.
async fn release_allocation(
    project_id: Uuid,
    resolved: &ResolvedEndpoint,
    allocation: &UdpAllocation,
) {
    if let Err(err) = resolved
        .node
        .compute()
        .api()
        .release_udp_port(project_id, allocation)
        .await
    {
        warn!(node = %resolved.node.id(), lport = allocation.lport, error = %err,
            "failed to roll back UDP allocation, orphan left on compute");
    }
}

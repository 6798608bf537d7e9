//! HTTP client for a remote compute agent.
//!
//! Implements [`ComputeApi`] over the compute agent REST surface. Transport
//! failures are classified into the typed error kinds: a request deadline
//! maps to `Timeout` (ambiguous remote state), a connection failure maps to
//! `Unreachable`, and a non-2xx response surfaces the remote error body.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::{CaptureSpec, ComputeApi, NioSpec, NodeSpec, UdpAllocation};
use crate::error::{ControllerError, Result};
use crate::topology::Capabilities;

/// Default deadline for compute calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for one remote compute agent.
///
/// The underlying connection pool is safe for concurrent use; the client is
/// cheap to clone and shared across in-flight operations.
#[derive(Debug, Clone)]
pub struct HttpComputeClient {
    compute_id: Uuid,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
    client: Client,
    timeout: Duration,
}

impl HttpComputeClient {
    /// Create a client for the compute at `base_url` (e.g. `http://10.0.0.5:3080`).
    pub fn new(
        compute_id: Uuid,
        base_url: impl Into<String>,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControllerError::Compute(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            compute_id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user,
            password,
            client,
            timeout,
        })
    }

    pub fn compute_id(&self) -> Uuid {
        self.compute_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn node_path(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> String {
        format!(
            "{}/v1/projects/{}/{}/nodes/{}",
            self.base_url, project_id, node_type, node_id
        )
    }

    fn port_path(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> String {
        format!(
            "{}/adapters/{}/ports/{}",
            self.node_path(project_id, node_type, node_id),
            adapter_number,
            port_number
        )
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    /// Issue the request and classify transport-level failures.
    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let started = Instant::now();
        let response = self
            .authed(req)
            .send()
            .await
            .map_err(|e| self.classify(e, started.elapsed()))?;
        self.check_status(response).await
    }

    fn classify(&self, err: reqwest::Error, elapsed: Duration) -> ControllerError {
        if err.is_timeout() {
            debug!(compute = %self.compute_id, ?elapsed, "compute request hit its deadline");
            ControllerError::Timeout {
                compute_id: self.compute_id,
                elapsed,
            }
        } else if err.is_connect() {
            debug!(compute = %self.compute_id, error = %err, "compute connection failed");
            ControllerError::Unreachable {
                compute_id: self.compute_id,
                reason: err.to_string(),
            }
        } else {
            ControllerError::Compute(err.to_string())
        }
    }

    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::CONFLICT => ControllerError::Conflict(body),
            StatusCode::UNAUTHORIZED => ControllerError::Unauthorized(body),
            StatusCode::FORBIDDEN => ControllerError::Forbidden(body),
            StatusCode::GATEWAY_TIMEOUT => ControllerError::Timeout {
                compute_id: self.compute_id,
                elapsed: self.timeout,
            },
            _ => ControllerError::Compute(format!("{}: {}", status, body)),
        })
    }

    /// POST to a node action endpoint (`start`, `stop`, ...).
    async fn node_action(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        action: &str,
    ) -> Result<()> {
        let url = format!("{}/{}", self.node_path(project_id, node_type, node_id), action);
        self.send(self.client.post(&url)).await?;
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for HttpComputeClient {
    async fn probe(&self) -> Result<Capabilities> {
        let url = format!("{}/v1/capabilities", self.base_url);
        let response = self.send(self.client.get(&url)).await?;
        response
            .json()
            .await
            .map_err(|e| ControllerError::Compute(format!("invalid capabilities response: {}", e)))
    }

    async fn create_node(&self, project_id: Uuid, spec: &NodeSpec) -> Result<()> {
        let url = format!(
            "{}/v1/projects/{}/{}/nodes",
            self.base_url, project_id, spec.node_type
        );
        self.send(self.client.post(&url).json(spec)).await?;
        Ok(())
    }

    async fn delete_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()> {
        let url = self.node_path(project_id, node_type, node_id);
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn start_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()> {
        self.node_action(project_id, node_type, node_id, "start").await
    }

    async fn stop_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()> {
        self.node_action(project_id, node_type, node_id, "stop").await
    }

    async fn suspend_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()> {
        self.node_action(project_id, node_type, node_id, "suspend").await
    }

    async fn resume_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()> {
        self.node_action(project_id, node_type, node_id, "resume").await
    }

    async fn reload_node(&self, project_id: Uuid, node_type: &str, node_id: Uuid) -> Result<()> {
        self.node_action(project_id, node_type, node_id, "reload").await
    }

    async fn allocate_udp_port(&self, project_id: Uuid) -> Result<UdpAllocation> {
        let url = format!("{}/v1/projects/{}/udp", self.base_url, project_id);
        let response = self.send(self.client.post(&url)).await?;
        response
            .json()
            .await
            .map_err(|e| ControllerError::Compute(format!("invalid UDP allocation response: {}", e)))
    }

    async fn release_udp_port(&self, project_id: Uuid, allocation: &UdpAllocation) -> Result<()> {
        let url = format!(
            "{}/v1/projects/{}/udp/{}",
            self.base_url, project_id, allocation.lport
        );
        self.send(
            self.client
                .delete(&url)
                .json(&serde_json::json!({ "token": allocation.token })),
        )
        .await?;
        Ok(())
    }

    async fn add_port_binding(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
        nio: &NioSpec,
    ) -> Result<()> {
        let url = format!(
            "{}/nio",
            self.port_path(project_id, node_type, node_id, adapter_number, port_number)
        );
        self.send(self.client.post(&url).json(nio)).await?;
        Ok(())
    }

    async fn remove_port_binding(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> Result<()> {
        let url = format!(
            "{}/nio",
            self.port_path(project_id, node_type, node_id, adapter_number, port_number)
        );
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn start_capture(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
        capture: &CaptureSpec,
    ) -> Result<()> {
        let url = format!(
            "{}/capture/start",
            self.port_path(project_id, node_type, node_id, adapter_number, port_number)
        );
        self.send(self.client.post(&url).json(capture)).await?;
        Ok(())
    }

    async fn stop_capture(
        &self,
        project_id: Uuid,
        node_type: &str,
        node_id: Uuid,
        adapter_number: u32,
        port_number: u32,
    ) -> Result<()> {
        let url = format!(
            "{}/capture/stop",
            self.port_path(project_id, node_type, node_id, adapter_number, port_number)
        );
        self.send(self.client.post(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpComputeClient {
        HttpComputeClient::new(
            Uuid::nil(),
            "http://10.0.0.5:3080/",
            None,
            None,
            DEFAULT_TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(client().base_url(), "http://10.0.0.5:3080");
    }

    #[test]
    fn node_path_includes_emulator_type() {
        let c = client();
        let project = Uuid::new_v4();
        let node = Uuid::new_v4();
        assert_eq!(
            c.node_path(project, "qemu", node),
            format!("http://10.0.0.5:3080/v1/projects/{}/qemu/nodes/{}", project, node)
        );
    }

    #[test]
    fn port_path_addresses_adapter_and_port() {
        let c = client();
        let project = Uuid::new_v4();
        let node = Uuid::new_v4();
        let path = c.port_path(project, "docker", node, 2, 1);
        assert!(path.ends_with(&format!("/docker/nodes/{}/adapters/2/ports/1", node)));
    }

    #[test]
    fn nio_spec_serializes_tagged() {
        let nio = NioSpec::Udp {
            lport: 20000,
            rhost: "10.0.0.6".to_string(),
            rport: 20001,
            filters: Default::default(),
        };
        let json = serde_json::to_string(&nio).unwrap();
        assert!(json.contains("\"type\":\"udp\""));
    }
}

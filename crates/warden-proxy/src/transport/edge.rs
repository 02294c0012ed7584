use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;

use super::agent::AGENT_KUBERNETES_PATH;
use super::{BaseTransport, Transport, UpgradeTarget};
use crate::error::{Error, Result};
use crate::tunnel::TunnelService;

/// Kubernetes API base URL of an agent behind a tunnel on `port`
pub fn edge_url(port: u16) -> String {
    format!("http://127.0.0.1:{}{}", port, AGENT_KUBERNETES_PATH)
}

/// Transport to an edge agent through its reverse tunnel
pub struct EdgeTransport {
    base: BaseTransport,
    tunnels: Arc<TunnelService>,
}

impl EdgeTransport {
    /// Create a transport over the tunnel registry
    pub fn new(base: BaseTransport, tunnels: Arc<TunnelService>) -> Self {
        Self { base, tunnels }
    }

    fn target(&self) -> Result<String> {
        let endpoint_id = self.base.endpoint_id();
        let tunnel = self.tunnels.get(endpoint_id).ok_or_else(|| {
            Error::Proxy(format!("no tunnel established for endpoint {}", endpoint_id))
        })?;
        Ok(edge_url(tunnel.port))
    }
}

#[async_trait]
impl Transport for EdgeTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>> {
        let target = self.target()?;
        let endpoint_id = self.base.endpoint_id();

        match self.base.round_trip(request, &target).await {
            Ok(response) => {
                self.tunnels.set_active(endpoint_id);
                Ok(response)
            }
            Err(e) => {
                // Only transport failures say anything about the tunnel
                if matches!(e, Error::Proxy(_)) {
                    self.tunnels.set_idle(endpoint_id);
                }
                Err(e)
            }
        }
    }

    async fn upgrade_target(
        &self,
        _headers: &HeaderMap,
        token: Option<&str>,
        path_and_query: &str,
    ) -> Result<UpgradeTarget> {
        let target = self.target()?;
        self.base
            .upgrade_target(token, path_and_query, &target, false)
            .await
    }
}

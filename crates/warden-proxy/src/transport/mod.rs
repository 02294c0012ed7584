//! Transports to the Kubernetes API of each environment
//!
//! Three transports share one [`BaseTransport`] for identity, credentials,
//! operation guards, forwarding and audit. They differ only in where the
//! request goes:
//!
//! - [`LocalTransport`]: the control plane the gateway runs next to
//! - [`AgentTransport`]: a remote agent over HTTP(S), every request signed
//! - [`EdgeTransport`]: a remote agent behind a reverse tunnel, signed, with
//!   the tunnel marked active or idle after each round trip

mod agent;
mod base;
mod edge;
mod local;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use dashmap::DashMap;
use tracing::{debug, info};
use warden_authz::AuthorizationService;
use warden_common::backend::BackendFactory;
use warden_common::identity::JwtService;
use warden_common::model::{Endpoint, EndpointId, EndpointType};
use warden_common::store::PolicyStore;
use warden_token::TokenManager;

use crate::audit::AuditLogger;
use crate::error::Result;
use crate::forwarder::ReqwestForwarder;
use crate::signature::SignatureService;
use crate::tunnel::TunnelService;

pub use agent::{agent_url, AgentTransport};
pub use base::{Authorized, BaseTransport, MAX_BODY_SIZE};
pub use edge::{edge_url, EdgeTransport};
pub use local::LocalTransport;

/// Collaborators every transport and handler needs
#[derive(Clone)]
pub struct GatewayServices {
    /// Policy store
    pub store: Arc<dyn PolicyStore>,
    /// Platform token validation
    pub jwt: Arc<JwtService>,
    /// Role resolution
    pub authz: Arc<AuthorizationService>,
    /// Backend credentials
    pub tokens: Arc<TokenManager>,
    /// Orchestration clients per environment
    pub backends: Arc<dyn BackendFactory>,
    /// Audit sink
    pub audit: Arc<dyn AuditLogger>,
}

/// Where an exec WebSocket is dialled, with the headers it needs
#[derive(Debug, Clone)]
pub struct UpgradeTarget {
    /// `ws://` or `wss://` URL
    pub url: String,
    /// Credential and signature headers
    pub headers: HeaderMap,
    /// Skip certificate verification
    pub accept_invalid_certs: bool,
}

/// One environment's round tripper
#[async_trait]
pub trait Transport: Send + Sync {
    /// Forward one request and return the environment's response
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>>;

    /// Authorize an exec upgrade and describe how to dial the backend
    ///
    /// `path_and_query` is the Kubernetes API path without the environment
    /// prefix.
    async fn upgrade_target(
        &self,
        headers: &HeaderMap,
        token: Option<&str>,
        path_and_query: &str,
    ) -> Result<UpgradeTarget>;
}

/// Builds and caches one transport per environment
pub struct TransportFactory {
    services: GatewayServices,
    signer: Arc<SignatureService>,
    tunnels: Arc<TunnelService>,
    transports: DashMap<EndpointId, Arc<dyn Transport>>,
}

impl TransportFactory {
    /// Create a factory
    pub fn new(
        services: GatewayServices,
        signer: Arc<SignatureService>,
        tunnels: Arc<TunnelService>,
    ) -> Self {
        Self {
            services,
            signer,
            tunnels,
            transports: DashMap::new(),
        }
    }

    /// Shared collaborators
    pub fn services(&self) -> &GatewayServices {
        &self.services
    }

    /// The transport for an environment, built on first use
    pub fn transport_for(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = self.transports.get(&endpoint.id) {
            return Ok(transport.clone());
        }

        let transport = self.build(endpoint)?;
        let transport = self
            .transports
            .entry(endpoint.id)
            .or_insert(transport)
            .clone();
        info!(endpoint = %endpoint.id, kind = ?endpoint.endpoint_type, "Created transport");
        Ok(transport)
    }

    fn build(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = match endpoint.endpoint_type {
            EndpointType::KubernetesLocal => {
                let base = BaseTransport::new(
                    endpoint.id,
                    self.services.clone(),
                    Arc::new(ReqwestForwarder::new(true)?),
                    None,
                );
                Arc::new(LocalTransport::new(base, &endpoint.url))
            }
            EndpointType::AgentOnKubernetes => {
                let base = BaseTransport::new(
                    endpoint.id,
                    self.services.clone(),
                    Arc::new(ReqwestForwarder::new(endpoint.tls_config.skip_verify)?),
                    Some(self.signer.clone()),
                );
                Arc::new(AgentTransport::new(base, endpoint))
            }
            EndpointType::EdgeAgentOnKubernetes => {
                let base = BaseTransport::new(
                    endpoint.id,
                    self.services.clone(),
                    Arc::new(ReqwestForwarder::new(false)?),
                    Some(self.signer.clone()),
                );
                Arc::new(EdgeTransport::new(base, self.tunnels.clone()))
            }
        };
        Ok(transport)
    }

    /// Forget an environment's transport and backend client
    pub fn evict(&self, endpoint_id: EndpointId) {
        if self.transports.remove(&endpoint_id).is_some() {
            debug!(endpoint = %endpoint_id, "Evicted transport");
        }
        self.services.backends.evict(endpoint_id);
    }
}

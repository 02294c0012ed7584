//! Per-environment kube clients
//!
//! Local environments use the in-cluster configuration. Agent and edge
//! environments are reached through the gateway itself: the client targets
//! the gateway's own Kubernetes route for that environment and authenticates
//! with a platform token for the gateway's administrator identity, so the
//! request flows through the agent or edge transport like any other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use kube::{Client, Config};
use secrecy::SecretString;
use tracing::{debug, info};
use warden_common::backend::{BackendFactory, ClusterBackend};
use warden_common::identity::{JwtService, TokenData};
use warden_common::model::{Endpoint, EndpointId, EndpointType, UserId, UserRole};
use warden_common::{Error, Result};

use crate::backend::KubeBackend;

/// Identity the gateway uses when it calls itself
pub fn internal_identity() -> TokenData {
    TokenData {
        id: UserId(0),
        username: "warden".to_string(),
        role: UserRole::Administrator,
    }
}

/// Kubernetes route of an environment below `internal_url`
pub fn environment_url(internal_url: &str, endpoint_id: EndpointId) -> String {
    format!(
        "{}/api/endpoints/{}/kubernetes",
        internal_url.trim_end_matches('/'),
        endpoint_id
    )
}

/// Client configuration for an environment reached through the gateway
pub fn gateway_config(
    internal_url: &str,
    endpoint_id: EndpointId,
    token: String,
) -> Result<Config> {
    let url = environment_url(internal_url, endpoint_id);
    let uri: http::Uri = url
        .parse()
        .map_err(|e| Error::config(format!("invalid internal url {}: {}", url, e)))?;

    let mut config = Config::new(uri);
    // The gateway serves its own certificate on the internal route
    config.accept_invalid_certs = true;
    config.auth_info.token = Some(SecretString::from(token));
    Ok(config)
}

struct CachedBackend {
    backend: Arc<KubeBackend>,
    created: Instant,
}

/// Builds and caches one backend per environment
pub struct KubeBackendFactory {
    jwt: Arc<JwtService>,
    internal_url: String,
    max_age: Duration,
    backends: DashMap<EndpointId, CachedBackend>,
}

impl KubeBackendFactory {
    /// Create a factory
    ///
    /// `max_age` must stay below the validity of tokens issued by `jwt`;
    /// older gateway clients are rebuilt with a fresh token.
    pub fn new(jwt: Arc<JwtService>, internal_url: impl Into<String>, max_age: Duration) -> Self {
        Self {
            jwt,
            internal_url: internal_url.into(),
            max_age,
            backends: DashMap::new(),
        }
    }

    async fn build(&self, endpoint: &Endpoint) -> Result<KubeBackend> {
        let client = match endpoint.endpoint_type {
            EndpointType::KubernetesLocal => Client::try_default().await.map_err(|e| {
                Error::upstream(format!("failed to create in-cluster client: {}", e))
            })?,
            EndpointType::AgentOnKubernetes | EndpointType::EdgeAgentOnKubernetes => {
                let token = self.jwt.issue(&internal_identity())?;
                let config = gateway_config(&self.internal_url, endpoint.id, token)?;
                Client::try_from(config)
                    .map_err(|e| Error::upstream(format!("failed to create client: {}", e)))?
            }
        };
        Ok(KubeBackend::new(client))
    }

    fn cached(&self, endpoint_id: EndpointId) -> Option<Arc<KubeBackend>> {
        let entry = self.backends.get(&endpoint_id)?;
        (entry.created.elapsed() < self.max_age).then(|| entry.backend.clone())
    }
}

#[async_trait]
impl BackendFactory for KubeBackendFactory {
    async fn backend_for(&self, endpoint: &Endpoint) -> Result<Arc<dyn ClusterBackend>> {
        if let Some(backend) = self.cached(endpoint.id) {
            let backend: Arc<dyn ClusterBackend> = backend;
            return Ok(backend);
        }

        let backend = Arc::new(self.build(endpoint).await?);
        self.backends.insert(
            endpoint.id,
            CachedBackend {
                backend: backend.clone(),
                created: Instant::now(),
            },
        );
        info!(endpoint = %endpoint.id, kind = ?endpoint.endpoint_type, "Created cluster client");

        let backend: Arc<dyn ClusterBackend> = backend;
        Ok(backend)
    }

    fn evict(&self, endpoint_id: EndpointId) {
        if self.backends.remove(&endpoint_id).is_some() {
            debug!(endpoint = %endpoint_id, "Evicted cluster client");
        }
    }
}

//! In-memory collaborators for tests
//!
//! `InMemoryBackend` records every mutating call so tests can assert on
//! reconciliation behaviour (how often the policy document was written, which
//! namespace roles a service account was bound to).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendFactory, ClusterBackend};
use crate::model::{Endpoint, EndpointId, NamespaceAccessPolicies, NodeInfo, Role, UserId};
use crate::{Error, Result};

/// Fake cluster holding namespaces, the policy document and bindings
#[derive(Default)]
pub struct InMemoryBackend {
    namespaces: Mutex<Vec<String>>,
    policies: Mutex<NamespaceAccessPolicies>,
    bindings: Mutex<BTreeMap<UserId, BTreeMap<String, Role>>>,
    nodes: Mutex<Vec<NodeInfo>>,
    fail_upstream: Mutex<bool>,
    policy_writes: AtomicUsize,
    token_requests: AtomicUsize,
}

impl InMemoryBackend {
    /// Create a cluster with the given namespaces
    pub fn with_namespaces(namespaces: &[&str]) -> Self {
        let backend = Self::default();
        *backend.namespaces.lock() = namespaces.iter().map(|n| n.to_string()).collect();
        backend
    }

    /// Replace the stored policy document without counting it as a write
    pub fn seed_policies(&self, policies: NamespaceAccessPolicies) {
        *self.policies.lock() = policies;
    }

    /// Replace the node list
    pub fn seed_nodes(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.lock() = nodes;
    }

    /// Make every subsequent call fail with an upstream error
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.fail_upstream.lock() = unreachable;
    }

    /// Current policy document
    pub fn policies(&self) -> NamespaceAccessPolicies {
        self.policies.lock().clone()
    }

    /// Namespace roles the user's service account is bound to
    pub fn bindings_for(&self, user_id: UserId) -> Option<BTreeMap<String, Role>> {
        self.bindings.lock().get(&user_id).cloned()
    }

    /// Number of policy document writes
    pub fn policy_writes(&self) -> usize {
        self.policy_writes.load(Ordering::SeqCst)
    }

    /// Number of token requests
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if *self.fail_upstream.lock() {
            return Err(Error::upstream("cluster unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterBackend for InMemoryBackend {
    async fn get_namespaces(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.namespaces.lock().clone())
    }

    async fn get_namespace_access_policies(&self) -> Result<NamespaceAccessPolicies> {
        self.check()?;
        Ok(self.policies.lock().clone())
    }

    async fn update_namespace_access_policies(
        &self,
        policies: &NamespaceAccessPolicies,
    ) -> Result<()> {
        self.check()?;
        self.policy_writes.fetch_add(1, Ordering::SeqCst);
        *self.policies.lock() = policies.clone();
        Ok(())
    }

    async fn setup_user_service_account(
        &self,
        user_id: UserId,
        namespace_roles: &BTreeMap<String, Role>,
    ) -> Result<()> {
        self.check()?;
        self.bindings.lock().insert(user_id, namespace_roles.clone());
        Ok(())
    }

    async fn get_service_account_bearer_token(&self, user_id: UserId) -> Result<String> {
        self.check()?;
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        Ok(format!("sa-token-{}", user_id))
    }

    async fn get_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.check()?;
        Ok(self.nodes.lock().clone())
    }
}

/// Factory returning the same backend for every environment
pub struct StaticBackendFactory {
    backend: Arc<InMemoryBackend>,
}

impl StaticBackendFactory {
    /// Wrap a backend
    pub fn new(backend: Arc<InMemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BackendFactory for StaticBackendFactory {
    async fn backend_for(&self, _endpoint: &Endpoint) -> Result<Arc<dyn ClusterBackend>> {
        let backend: Arc<dyn ClusterBackend> = self.backend.clone();
        Ok(backend)
    }

    fn evict(&self, _endpoint_id: EndpointId) {}
}

//! Orchestration backend contract
//!
//! The namespace-access-policy document is the only policy data that lives in
//! the cluster instead of the primary store, so every component that needs it
//! goes through a `ClusterBackend`. All calls may fail with an upstream error
//! which callers propagate unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Endpoint, EndpointId, NamespaceAccessPolicies, NodeInfo, Role, UserId};
use crate::Result;

/// Client for one managed cluster
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// List namespace names
    async fn get_namespaces(&self) -> Result<Vec<String>>;

    /// Read the namespace-access-policy document (empty when absent)
    async fn get_namespace_access_policies(&self) -> Result<NamespaceAccessPolicies>;

    /// Replace the namespace-access-policy document
    async fn update_namespace_access_policies(
        &self,
        policies: &NamespaceAccessPolicies,
    ) -> Result<()>;

    /// Ensure the user's service account is bound to exactly these namespace roles
    ///
    /// Idempotent: repeated calls with the same roles leave the cluster unchanged.
    async fn setup_user_service_account(
        &self,
        user_id: UserId,
        namespace_roles: &BTreeMap<String, Role>,
    ) -> Result<()>;

    /// Fetch the bearer token issued for the user's service account
    async fn get_service_account_bearer_token(&self, user_id: UserId) -> Result<String>;

    /// List cluster nodes
    async fn get_nodes(&self) -> Result<Vec<NodeInfo>>;
}

/// Produces (and caches) a [`ClusterBackend`] per environment
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Get the backend client for an environment
    async fn backend_for(&self, endpoint: &Endpoint) -> Result<Arc<dyn ClusterBackend>>;

    /// Drop any cached client for an environment
    fn evict(&self, endpoint_id: EndpointId);
}

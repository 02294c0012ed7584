//! Token Manager
//!
//! Turns a caller identity into a credential the orchestration backend
//! accepts. Administrators get the gateway's admin token. Everyone else gets
//! a service-account token scoped to the namespaces they may access, which
//! requires reconciling the namespace policy document and the account's role
//! bindings first.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use warden_authz::namespace::merge_user_namespace_policies;
use warden_authz::AuthorizationService;
use warden_common::backend::ClusterBackend;
use warden_common::identity::TokenData;
use warden_common::model::{Endpoint, UserId};
use warden_common::{Error, Result};
use zeroize::Zeroizing;

use crate::cache::TokenCache;

/// Issues backend credentials for gateway callers
pub struct TokenManager {
    authz: Arc<AuthorizationService>,
    cache: Arc<TokenCache>,
    admin_token: Option<Zeroizing<String>>,
}

impl TokenManager {
    /// Create a manager
    ///
    /// Without an admin token every administrator request fails with a
    /// credential error.
    pub fn new(
        authz: Arc<AuthorizationService>,
        cache: Arc<TokenCache>,
        admin_token: Option<Zeroizing<String>>,
    ) -> Self {
        Self {
            authz,
            cache,
            admin_token,
        }
    }

    /// The cluster-admin token
    pub fn admin_token(&self) -> Result<Zeroizing<String>> {
        self.admin_token
            .clone()
            .ok_or_else(|| Error::credential("admin token is not loaded"))
    }

    /// Credential for a caller on an environment
    ///
    /// Non-admin tokens go through the per-environment cache, so the
    /// provisioning flow only runs on a miss.
    pub async fn get_token(
        &self,
        identity: &TokenData,
        endpoint: &Endpoint,
        backend: &dyn ClusterBackend,
    ) -> Result<Zeroizing<String>> {
        if identity.is_admin() {
            return self.admin_token();
        }

        let token = self
            .cache
            .get_or_create(endpoint.id)
            .get_or_add(identity.id, || {
                self.get_user_service_account_token(identity.id, endpoint, backend)
            })
            .await?;
        Ok(Zeroizing::new(token))
    }

    /// Provision the user's service account and return its bearer token
    ///
    /// Reconciles the namespace policy document with the user's endpoint
    /// role, binds the service account to exactly the namespaces the user may
    /// access, then asks the backend for the account's token. Running it again
    /// with unchanged policies rewrites nothing.
    #[instrument(skip_all, fields(user = %user_id, endpoint = %endpoint.id))]
    pub async fn get_user_service_account_token(
        &self,
        user_id: UserId,
        endpoint: &Endpoint,
        backend: &dyn ClusterBackend,
    ) -> Result<String> {
        let access = self
            .authz
            .get_user_endpoint_access(user_id, endpoint)?
            .ok_or_else(|| Error::forbidden("user has no role on this environment"))?;

        let namespaces = backend.get_namespaces().await?;
        let current = backend.get_namespace_access_policies().await?;

        let (changed, policies) = merge_user_namespace_policies(
            user_id,
            Some(&access.role),
            &endpoint.kubernetes,
            current,
        );
        if changed {
            backend.update_namespace_access_policies(&policies).await?;
            info!(user = %user_id, endpoint = %endpoint.id, "Updated namespace access policies");
        }

        let namespace_roles = self.authz.get_user_namespace_roles(
            user_id,
            endpoint,
            &access,
            &namespaces,
            &policies,
        )?;
        debug!(
            user = %user_id,
            endpoint = %endpoint.id,
            namespaces = namespace_roles.len(),
            "Provisioning service account"
        );
        backend
            .setup_user_service_account(user_id, &namespace_roles)
            .await?;

        backend.get_service_account_bearer_token(user_id).await
    }
}

//! Store-facing authorization API
//!
//! `AuthorizationService` loads the records a resolution needs from the
//! policy store and the cluster, runs the pure resolvers, and fans out change
//! events after anything it persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use warden_common::backend::{BackendFactory, ClusterBackend};
use warden_common::model::{
    Endpoint, EndpointGroup, EndpointGroupId, EndpointId, NamespaceAccessPolicies, Role, TeamId,
    UserId,
};
use warden_common::store::PolicyStore;
use warden_common::{Authorizations, Result};

use crate::events::AuthEvents;
use crate::namespace::{
    merge_user_namespace_policies, namespace_authorizations, remove_team_from_namespace_policies,
    remove_user_from_namespace_policies, resolve_namespace_roles, NamespaceRoleQuery,
};
use crate::resolve::{endpoint_authorizations, resolve_endpoint_role, resolve_team_endpoint_role};

/// A user's resolved role on an environment with its effective authorizations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAccess {
    /// Resolved endpoint role
    pub role: Role,
    /// Role table plus environment overrides
    pub authorizations: Authorizations,
}

/// Authorization queries and policy maintenance over the policy store
pub struct AuthorizationService {
    store: Arc<dyn PolicyStore>,
    backends: Arc<dyn BackendFactory>,
    events: AuthEvents,
}

impl AuthorizationService {
    /// Create the service
    pub fn new(
        store: Arc<dyn PolicyStore>,
        backends: Arc<dyn BackendFactory>,
        events: AuthEvents,
    ) -> Self {
        Self {
            store,
            backends,
            events,
        }
    }

    /// Event fan-out used after policy changes
    pub fn events(&self) -> &AuthEvents {
        &self.events
    }

    /// The underlying policy store
    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    fn team_ids(&self, user_id: UserId) -> Result<Vec<TeamId>> {
        Ok(self
            .store
            .memberships_by_user(user_id)?
            .into_iter()
            .map(|m| m.team_id)
            .collect())
    }

    /// Resolve a user's role on an environment
    #[instrument(skip_all, fields(user = %user_id, endpoint = %endpoint_id))]
    pub fn get_user_endpoint_role(
        &self,
        user_id: UserId,
        endpoint_id: EndpointId,
    ) -> Result<Option<Role>> {
        let endpoint = self.store.endpoint(endpoint_id)?;
        Ok(self
            .get_user_endpoint_access(user_id, &endpoint)?
            .map(|access| access.role))
    }

    /// Resolve a user's role and effective authorizations on an environment
    pub fn get_user_endpoint_access(
        &self,
        user_id: UserId,
        endpoint: &Endpoint,
    ) -> Result<Option<EndpointAccess>> {
        self.store.user(user_id)?;
        let group = self.store.endpoint_group(endpoint.group_id)?;
        let roles = self.store.roles()?;
        let team_ids = self.team_ids(user_id)?;

        let access = resolve_endpoint_role(user_id, &team_ids, endpoint, &group, &roles).map(
            |role| EndpointAccess {
                authorizations: endpoint_authorizations(&role, endpoint),
                role,
            },
        );

        debug!(
            user = %user_id,
            endpoint = %endpoint.id,
            role = access.as_ref().map(|a| a.role.name.as_str()).unwrap_or("none"),
            "Resolved endpoint role"
        );
        Ok(access)
    }

    /// Resolve a team's role on an environment
    #[instrument(skip_all, fields(team = %team_id, endpoint = %endpoint_id))]
    pub fn get_team_endpoint_role(
        &self,
        team_id: TeamId,
        endpoint_id: EndpointId,
    ) -> Result<Option<Role>> {
        self.store.team(team_id)?;
        let endpoint = self.store.endpoint(endpoint_id)?;
        let group = self.store.endpoint_group(endpoint.group_id)?;
        let roles = self.store.roles()?;
        Ok(resolve_team_endpoint_role(team_id, &endpoint, &group, &roles))
    }

    /// Per-namespace roles for a user whose endpoint access is already known
    pub fn get_user_namespace_roles(
        &self,
        user_id: UserId,
        endpoint: &Endpoint,
        access: &EndpointAccess,
        namespaces: &[String],
        policies: &NamespaceAccessPolicies,
    ) -> Result<BTreeMap<String, Role>> {
        let roles = self.store.roles()?;
        let team_ids = self.team_ids(user_id)?;

        Ok(resolve_namespace_roles(&NamespaceRoleQuery {
            user_id,
            team_ids: &team_ids,
            endpoint_role: &access.role,
            endpoint_authorizations: &access.authorizations,
            namespaces,
            policies,
            kubernetes: &endpoint.kubernetes,
            roles: &roles,
        }))
    }

    /// Namespace name to namespace authorizations for a user
    ///
    /// Users without an endpoint role get an empty map.
    #[instrument(skip_all, fields(user = %user_id, endpoint = %endpoint.id))]
    pub async fn get_namespace_authorizations(
        &self,
        user_id: UserId,
        endpoint: &Endpoint,
        backend: &dyn ClusterBackend,
    ) -> Result<BTreeMap<String, Authorizations>> {
        let Some(access) = self.get_user_endpoint_access(user_id, endpoint)? else {
            return Ok(BTreeMap::new());
        };

        let namespaces = backend.get_namespaces().await?;
        let policies = backend.get_namespace_access_policies().await?;
        let roles =
            self.get_user_namespace_roles(user_id, endpoint, &access, &namespaces, &policies)?;

        Ok(namespace_authorizations(&roles))
    }

    /// Merge the user's current endpoint role into a namespace policy document
    ///
    /// Returns whether anything changed and the merged document. Persisting
    /// is left to the caller.
    pub fn update_user_namespace_access_policies(
        &self,
        user_id: UserId,
        endpoint: &Endpoint,
        policies: NamespaceAccessPolicies,
    ) -> Result<(bool, NamespaceAccessPolicies)> {
        let access = self.get_user_endpoint_access(user_id, endpoint)?;
        Ok(merge_user_namespace_policies(
            user_id,
            access.as_ref().map(|a| &a.role),
            &endpoint.kubernetes,
            policies,
        ))
    }

    /// Recompute and persist every user's per-endpoint authorizations
    ///
    /// Administrators are stored with an empty map. Only users whose map
    /// changed are written, so re-running after a partial failure completes
    /// the refresh.
    #[instrument(skip(self))]
    pub async fn update_users_authorizations(&self) -> Result<()> {
        let endpoints = self.store.endpoints()?;
        let groups: BTreeMap<EndpointGroupId, EndpointGroup> = self
            .store
            .endpoint_groups()?
            .into_iter()
            .map(|g| (g.id, g))
            .collect();
        let roles = self.store.roles()?;
        let memberships = self.store.memberships()?;

        let mut updated = 0usize;
        for mut user in self.store.users()? {
            let computed = if user.is_admin() {
                BTreeMap::new()
            } else {
                let team_ids: Vec<TeamId> = memberships
                    .iter()
                    .filter(|m| m.user_id == user.id)
                    .map(|m| m.team_id)
                    .collect();

                let mut authorizations = BTreeMap::new();
                for endpoint in &endpoints {
                    let Some(group) = groups.get(&endpoint.group_id) else {
                        warn!(
                            endpoint = %endpoint.id,
                            group = %endpoint.group_id,
                            "Endpoint group missing, skipping"
                        );
                        continue;
                    };
                    if let Some(role) =
                        resolve_endpoint_role(user.id, &team_ids, endpoint, group, &roles)
                    {
                        let granted = endpoint_authorizations(&role, endpoint);
                        authorizations.insert(endpoint.id, granted);
                    }
                }
                authorizations
            };

            if user.endpoint_authorizations != computed {
                user.endpoint_authorizations = computed;
                self.store.update_user(&user)?;
                updated += 1;
            }
        }

        info!(updated, "Refreshed user authorizations");
        self.events.trigger_users_auth_update().await;
        Ok(())
    }

    /// Remove a user from every policy map and namespace policy document
    #[instrument(skip_all, fields(user = %user_id))]
    pub async fn remove_user_access_policies(&self, user_id: UserId) -> Result<()> {
        let endpoints = self.store.endpoints()?;
        for endpoint in &endpoints {
            if endpoint.user_access_policies.contains_key(&user_id) {
                let mut endpoint = endpoint.clone();
                endpoint.user_access_policies.remove(&user_id);
                self.store.update_endpoint(&endpoint)?;
            }
        }

        for mut group in self.store.endpoint_groups()? {
            if group.user_access_policies.remove(&user_id).is_some() {
                self.store.update_endpoint_group(&group)?;
            }
        }

        for mut registry in self.store.registries()? {
            let mut changed = false;
            for access in registry.registry_accesses.values_mut() {
                changed |= access.user_access_policies.remove(&user_id).is_some();
            }
            if changed {
                self.store.update_registry(&registry)?;
            }
        }

        for endpoint in &endpoints {
            self.edit_namespace_policies(endpoint, |policies| {
                remove_user_from_namespace_policies(policies, user_id)
            })
            .await;
        }

        info!(user = %user_id, "Removed user access policies");
        self.events.trigger_user_auth_update(user_id).await;
        Ok(())
    }

    /// Remove a team from every policy map and namespace policy document
    #[instrument(skip_all, fields(team = %team_id))]
    pub async fn remove_team_access_policies(&self, team_id: TeamId) -> Result<()> {
        let endpoints = self.store.endpoints()?;
        for endpoint in &endpoints {
            if endpoint.team_access_policies.contains_key(&team_id) {
                let mut endpoint = endpoint.clone();
                endpoint.team_access_policies.remove(&team_id);
                self.store.update_endpoint(&endpoint)?;
            }
        }

        for mut group in self.store.endpoint_groups()? {
            if group.team_access_policies.remove(&team_id).is_some() {
                self.store.update_endpoint_group(&group)?;
            }
        }

        for mut registry in self.store.registries()? {
            let mut changed = false;
            for access in registry.registry_accesses.values_mut() {
                changed |= access.team_access_policies.remove(&team_id).is_some();
            }
            if changed {
                self.store.update_registry(&registry)?;
            }
        }

        for endpoint in &endpoints {
            self.edit_namespace_policies(endpoint, |policies| {
                remove_team_from_namespace_policies(policies, team_id)
            })
            .await;
        }

        info!(team = %team_id, "Removed team access policies");
        self.events.trigger_users_auth_update().await;
        Ok(())
    }

    /// Read-modify-write an environment's namespace policy document
    ///
    /// Failures are logged and skipped: an unreachable cluster must not block
    /// removing a subject from the store.
    async fn edit_namespace_policies<F>(&self, endpoint: &Endpoint, edit: F)
    where
        F: FnOnce(&mut NamespaceAccessPolicies) -> bool,
    {
        let result: Result<bool> = async {
            let backend = self.backends.backend_for(endpoint).await?;
            let mut policies = backend.get_namespace_access_policies().await?;
            if !edit(&mut policies) {
                return Ok(false);
            }
            backend.update_namespace_access_policies(&policies).await?;
            Ok(true)
        }
        .await;

        match result {
            Ok(true) => debug!(endpoint = %endpoint.id, "Updated namespace access policies"),
            Ok(false) => {}
            Err(e) => warn!(
                endpoint = %endpoint.id,
                error = %e,
                "Skipping namespace access policies of unreachable environment"
            ),
        }
    }
}

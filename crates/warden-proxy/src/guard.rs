//! Extra authorization for namespace-scoped operations
//!
//! The backend's RBAC already limits what a service-account token can do.
//! These checks run before forwarding for the operations where the
//! platform's own authorizations are stricter than the bound ClusterRole:
//!
//! | Operation | Allowed for |
//! |---|---|
//! | namespace delete | admin, or `K8sResourcePoolDetailsW` |
//! | secret / configmap write | admin, or `K8sConfigurationsW` and write access to the namespace |
//! | pod exec | admin, or `K8sApplicationConsoleRW` and write access to the namespace |
//!
//! Write access to a namespace means `K8sAccessAllNamespaces` or a namespace
//! role granting `K8sAccessNamespaceWrite`.

use tracing::{debug, info, instrument};
use warden_authz::AuthorizationService;
use warden_common::backend::ClusterBackend;
use warden_common::identity::TokenData;
use warden_common::model::{Endpoint, EndpointId};
use warden_common::store::PolicyStore;
use warden_common::{Authorization, Authorizations};

use crate::error::{Error, Result};
use crate::routing::K8sOperation;

fn denied(identity: &TokenData, endpoint: &Endpoint, what: &str) -> Error {
    Error::Forbidden(format!(
        "{} denied for user {} on endpoint {}",
        what, identity.username, endpoint.id
    ))
}

async fn can_write_namespace(
    authz: &AuthorizationService,
    identity: &TokenData,
    endpoint: &Endpoint,
    backend: &dyn ClusterBackend,
    authorizations: &Authorizations,
    namespace: &str,
) -> Result<bool> {
    if authorizations.is_granted(Authorization::K8sAccessAllNamespaces) {
        return Ok(true);
    }

    let namespaces = authz
        .get_namespace_authorizations(identity.id, endpoint, backend)
        .await?;
    Ok(namespaces
        .get(namespace)
        .is_some_and(|a| a.is_granted(Authorization::K8sAccessNamespaceWrite)))
}

/// Check a classified operation before it is forwarded
///
/// Administrators and unguarded operations pass without a lookup.
pub async fn authorize_operation(
    authz: &AuthorizationService,
    identity: &TokenData,
    endpoint: &Endpoint,
    backend: &dyn ClusterBackend,
    operation: &K8sOperation,
) -> Result<()> {
    if identity.is_admin() || *operation == K8sOperation::Other {
        return Ok(());
    }

    let access = authz
        .get_user_endpoint_access(identity.id, endpoint)?
        .ok_or_else(|| denied(identity, endpoint, "environment access"))?;
    let auths = &access.authorizations;

    let (allowed, what) = match operation {
        K8sOperation::NamespaceDelete { .. } => (
            auths.is_granted(Authorization::K8sResourcePoolDetailsW),
            "namespace delete",
        ),
        K8sOperation::ConfigurationWrite { namespace, .. } => (
            auths.is_granted(Authorization::K8sConfigurationsW)
                && can_write_namespace(authz, identity, endpoint, backend, auths, namespace)
                    .await?,
            "configuration write",
        ),
        K8sOperation::PodExec { namespace, .. } => (
            auths.is_granted(Authorization::K8sApplicationConsoleRW)
                && can_write_namespace(authz, identity, endpoint, backend, auths, namespace)
                    .await?,
            "pod exec",
        ),
        K8sOperation::Other => (true, "request"),
    };

    if allowed {
        debug!(
            user = %identity.username,
            endpoint = %endpoint.id,
            operation = what,
            "Operation allowed"
        );
        Ok(())
    } else {
        Err(denied(identity, endpoint, what))
    }
}

/// Check access to the node listing
pub fn authorize_nodes(
    authz: &AuthorizationService,
    identity: &TokenData,
    endpoint: &Endpoint,
) -> Result<()> {
    if identity.is_admin() {
        return Ok(());
    }
    let allowed = authz
        .get_user_endpoint_access(identity.id, endpoint)?
        .is_some_and(|a| a.authorizations.is_granted(Authorization::K8sClusterNodeR));
    if allowed {
        Ok(())
    } else {
        Err(denied(identity, endpoint, "node listing"))
    }
}

/// Remove every platform reference to a namespace about to be deleted
///
/// Drops the namespace from the live policy document, from every registry's
/// namespace allow-list for this environment, and deletes the stacks
/// deployed into it.
#[instrument(skip(store, backend))]
pub async fn cascade_namespace_delete(
    store: &dyn PolicyStore,
    backend: &dyn ClusterBackend,
    endpoint_id: EndpointId,
    namespace: &str,
) -> Result<()> {
    let mut policies = backend.get_namespace_access_policies().await?;
    if policies.remove(namespace).is_some() {
        backend.update_namespace_access_policies(&policies).await?;
    }

    for mut registry in store.registries()? {
        let Some(access) = registry.registry_accesses.get_mut(&endpoint_id) else {
            continue;
        };
        let before = access.namespaces.len();
        access.namespaces.retain(|n| n != namespace);
        if access.namespaces.len() != before {
            store.update_registry(&registry)?;
        }
    }

    let stacks = store
        .stacks()?
        .into_iter()
        .filter(|s| s.endpoint_id == endpoint_id && s.namespace.as_deref() == Some(namespace));
    for stack in stacks {
        store.delete_stack(stack.id)?;
    }

    info!(endpoint = %endpoint_id, namespace, "Removed namespace references");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ConfigKind;
    use crate::testing::{identity, Fixture};
    use std::collections::BTreeMap;
    use warden_common::model::{
        Registry, RegistryAccessPolicies, RegistryId, Stack, StackId, UserRole,
    };

    fn exec(namespace: &str) -> K8sOperation {
        K8sOperation::PodExec {
            namespace: namespace.into(),
            pod: "web-0".into(),
        }
    }

    fn secret_write(namespace: &str) -> K8sOperation {
        K8sOperation::ConfigurationWrite {
            namespace: namespace.into(),
            kind: ConfigKind::Secret,
        }
    }

    async fn check(f: &Fixture, user: u32, role: UserRole, op: &K8sOperation) -> Result<()> {
        authorize_operation(
            &f.authz,
            &identity(user, role),
            &f.endpoint(),
            f.backend.as_ref(),
            op,
        )
        .await
    }

    #[tokio::test]
    async fn test_admin_bypasses_checks() {
        let f = Fixture::new();
        let op = K8sOperation::NamespaceDelete {
            namespace: "team-a".into(),
        };
        check(&f, 1, UserRole::Administrator, &op).await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_requires_namespace_write() {
        let f = Fixture::new();
        // standard user with a namespace policy on team-a only
        check(&f, 7, UserRole::Standard, &exec("team-a")).await.unwrap();
        let err = check(&f, 7, UserRole::Standard, &exec("team-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_exec_requires_console_authorization() {
        let f = Fixture::new();
        // readonly user, namespace policy exists but no console authorization
        let err = check(&f, 8, UserRole::Standard, &exec("team-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_access_all_skips_namespace_lookup() {
        let f = Fixture::new();
        // operator: console plus every namespace
        check(&f, 10, UserRole::Standard, &exec("team-b")).await.unwrap();
        check(&f, 10, UserRole::Standard, &secret_write("kube-system"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_secret_write_follows_namespace_role() {
        let f = Fixture::new();
        check(&f, 7, UserRole::Standard, &secret_write("team-a"))
            .await
            .unwrap();
        assert!(check(&f, 7, UserRole::Standard, &secret_write("team-b"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_namespace_delete_requires_pool_write() {
        let f = Fixture::new();
        let op = K8sOperation::NamespaceDelete {
            namespace: "team-a".into(),
        };
        assert!(check(&f, 10, UserRole::Standard, &op).await.is_err());
    }

    #[tokio::test]
    async fn test_user_without_role_is_denied() {
        let f = Fixture::new();
        let err = check(&f, 9, UserRole::Standard, &exec("team-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unguarded_operation_needs_no_lookup() {
        let f = Fixture::new();
        f.backend.set_unreachable(true);
        check(&f, 9, UserRole::Standard, &K8sOperation::Other)
            .await
            .unwrap();
    }

    #[test]
    fn test_nodes_access() {
        let f = Fixture::new();
        let endpoint = f.endpoint();
        authorize_nodes(&f.authz, &identity(7, UserRole::Standard), &endpoint).unwrap();
        authorize_nodes(&f.authz, &identity(1, UserRole::Administrator), &endpoint).unwrap();
        assert!(authorize_nodes(&f.authz, &identity(9, UserRole::Standard), &endpoint).is_err());
    }

    #[tokio::test]
    async fn test_cascade_namespace_delete() {
        let f = Fixture::new();
        let endpoint_id = f.endpoint().id;
        f.store.put_registry(Registry {
            id: RegistryId(1),
            name: "hub".into(),
            url: "registry.example.com".into(),
            registry_accesses: BTreeMap::from([(
                endpoint_id,
                RegistryAccessPolicies {
                    namespaces: vec!["team-a".into(), "team-b".into()],
                    ..Default::default()
                },
            )]),
        });
        let stacks = [(1, "team-a"), (2, "team-b")];
        for (id, namespace) in stacks {
            f.store.put_stack(Stack {
                id: StackId(id),
                name: format!("stack-{}", id),
                endpoint_id,
                namespace: Some(namespace.into()),
            });
        }
        assert!(f.backend.policies().contains_key("team-a"));

        cascade_namespace_delete(f.store.as_ref(), f.backend.as_ref(), endpoint_id, "team-a")
            .await
            .unwrap();

        assert!(!f.backend.policies().contains_key("team-a"));
        let registry = &f.store.registries().unwrap()[0];
        assert_eq!(
            registry.registry_accesses[&endpoint_id].namespaces,
            vec!["team-b".to_string()]
        );
        let remaining: Vec<_> = f.store.stacks().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![StackId(2)]);
    }
}

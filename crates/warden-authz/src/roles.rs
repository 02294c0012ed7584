//! Predefined roles and their default authorization tables
//!
//! Roles are fixed templates. They are written to the store at startup and
//! whenever the default tables change; user code never invents new ones.

use std::collections::BTreeMap;

use tracing::{debug, info};
use warden_common::model::{Role, RoleId};
use warden_common::store::PolicyStore;
use warden_common::{Authorization, Authorizations, Result};

/// Full control over an environment
pub const ROLE_ENDPOINT_ADMIN: RoleId = RoleId(1);
/// Operate existing workloads across every namespace
pub const ROLE_OPERATOR: RoleId = RoleId(2);
/// Read-only view of every namespace
pub const ROLE_HELPDESK: RoleId = RoleId(3);
/// Deploy and manage workloads in granted namespaces
pub const ROLE_STANDARD_USER: RoleId = RoleId(4);
/// Read-only view of granted namespaces
pub const ROLE_READONLY: RoleId = RoleId(5);

use Authorization::*;

const READ_OPERATIONS: &[Authorization] = &[
    DockerContainerList,
    DockerContainerInspect,
    DockerContainerLogs,
    DockerImageList,
    DockerImageInspect,
    DockerNetworkList,
    DockerVolumeList,
    DockerVolumeInspect,
    DockerSecretList,
    K8sResourcePoolsR,
    K8sResourcePoolDetailsR,
    K8sApplicationsR,
    K8sApplicationLogsR,
    K8sConfigurationsR,
    K8sVolumesR,
    K8sClusterR,
    K8sClusterNodeR,
    StackList,
    StackInspect,
    StackFile,
    RegistryList,
    RegistryInspect,
];

const DEPLOY_OPERATIONS: &[Authorization] = &[
    DockerContainerCreate,
    DockerContainerStart,
    DockerContainerStop,
    DockerContainerDelete,
    DockerExecStart,
    DockerImagePull,
    DockerNetworkCreate,
    DockerVolumeCreate,
    DockerVolumeDelete,
    DockerSecretCreate,
    K8sApplicationsW,
    K8sApplicationConsoleRW,
    K8sConfigurationsW,
    K8sVolumesW,
    StackCreate,
    StackUpdate,
    StackDelete,
    WebhookCreate,
];

const OPERATOR_EXTRA_OPERATIONS: &[Authorization] = &[
    DockerImageDelete,
    DockerNetworkDelete,
    DockerSecretDelete,
    WebhookDelete,
    K8sAccessAllNamespaces,
    K8sAccessSystemNamespaces,
];

const HELPDESK_EXTRA_OPERATIONS: &[Authorization] =
    &[K8sAccessAllNamespaces, K8sAccessSystemNamespaces];

/// Volume-browse operations granted by the per-environment override
pub const VOLUME_BROWSE_READ: &[Authorization] = &[DockerAgentBrowseGet, DockerAgentBrowseList];

/// Volume-browse operations granted to standard users by the override
pub const VOLUME_BROWSE_WRITE: &[Authorization] = &[
    DockerAgentBrowseDelete,
    DockerAgentBrowsePut,
    DockerAgentBrowseRename,
];

fn table(groups: &[&[Authorization]]) -> Authorizations {
    groups.iter().flat_map(|g| g.iter().copied()).collect()
}

/// Default endpoint-level authorization table for a predefined role
///
/// Unknown role ids get an empty table.
pub fn default_endpoint_authorizations(role_id: RoleId) -> Authorizations {
    match role_id {
        ROLE_ENDPOINT_ADMIN => Authorization::ALL
            .iter()
            .copied()
            .filter(|a| !a.is_namespace_scoped())
            .collect(),
        ROLE_OPERATOR => table(&[READ_OPERATIONS, DEPLOY_OPERATIONS, OPERATOR_EXTRA_OPERATIONS]),
        ROLE_HELPDESK => table(&[READ_OPERATIONS, HELPDESK_EXTRA_OPERATIONS]),
        ROLE_STANDARD_USER => table(&[READ_OPERATIONS, DEPLOY_OPERATIONS]),
        ROLE_READONLY => table(&[READ_OPERATIONS]),
        _ => Authorizations::new(),
    }
}

/// Namespace-level authorization table per role
///
/// A namespace role only decides read or write access.
pub fn default_k8s_namespace_authorizations() -> BTreeMap<RoleId, Authorizations> {
    let read = Authorizations::new().with(K8sAccessNamespaceRead);
    let write = read.clone().with(K8sAccessNamespaceWrite);

    BTreeMap::from([
        (ROLE_ENDPOINT_ADMIN, write.clone()),
        (ROLE_OPERATOR, write.clone()),
        (ROLE_HELPDESK, read.clone()),
        (ROLE_STANDARD_USER, write),
        (ROLE_READONLY, read),
    ])
}

/// The five predefined roles with their current default tables
pub fn predefined_roles() -> Vec<Role> {
    [
        (
            ROLE_ENDPOINT_ADMIN,
            "Environment administrator",
            "Full control of all resources in an environment",
        ),
        (
            ROLE_OPERATOR,
            "Operator",
            "Operational control of all existing resources in an environment",
        ),
        (
            ROLE_HELPDESK,
            "Helpdesk",
            "Read-only access of all resources in an environment",
        ),
        (
            ROLE_STANDARD_USER,
            "Standard user",
            "Full control of assigned resources in an environment",
        ),
        (
            ROLE_READONLY,
            "Read-only user",
            "Read-only access of assigned resources in an environment",
        ),
    ]
    .into_iter()
    .map(|(id, name, description)| Role {
        id,
        name: name.to_string(),
        description: description.to_string(),
        priority: id.0 as i32,
        authorizations: default_endpoint_authorizations(id),
    })
    .collect()
}

/// Write the predefined roles to the store
///
/// Missing roles are created; existing roles are replaced only when they
/// differ, always with a complete authorization table. Running this twice in a
/// row leaves the store byte-identical.
pub fn create_or_update_predefined_roles(store: &dyn PolicyStore) -> Result<Vec<Role>> {
    let roles = predefined_roles();

    for role in &roles {
        match store.role(role.id) {
            Ok(existing) if existing == *role => {
                debug!(role = %role.name, "Predefined role unchanged");
            }
            Ok(_) => {
                store.update_role(role)?;
                info!(role = %role.name, "Updated predefined role");
            }
            Err(e) if e.is_not_found() => {
                store.create_role(role)?;
                info!(role = %role.name, "Created predefined role");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::store::MemoryStore;

    #[test]
    fn test_priorities_follow_role_ids() {
        let roles = predefined_roles();
        let priorities: Vec<_> = roles.iter().map(|r| (r.id.0, r.priority)).collect();
        assert_eq!(priorities, vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
    }

    #[test]
    fn test_endpoint_admin_has_every_endpoint_operation() {
        let admin = default_endpoint_authorizations(ROLE_ENDPOINT_ADMIN);
        for op in Authorization::ALL {
            assert_eq!(admin.is_granted(*op), !op.is_namespace_scoped(), "{}", op);
        }
    }

    #[test]
    fn test_namespace_access_flags() {
        let operator = default_endpoint_authorizations(ROLE_OPERATOR);
        assert!(operator.is_granted(K8sAccessAllNamespaces));

        let standard = default_endpoint_authorizations(ROLE_STANDARD_USER);
        assert!(!standard.is_granted(K8sAccessAllNamespaces));
        assert!(standard.is_granted(K8sApplicationConsoleRW));

        let readonly = default_endpoint_authorizations(ROLE_READONLY);
        assert!(!readonly.is_granted(K8sApplicationConsoleRW));
        assert!(readonly.is_granted(K8sApplicationsR));
    }

    #[test]
    fn test_namespace_table_is_read_write_only() {
        let tables = default_k8s_namespace_authorizations();
        assert_eq!(tables.len(), 5);
        assert!(tables[&ROLE_STANDARD_USER].is_granted(K8sAccessNamespaceWrite));
        assert!(!tables[&ROLE_HELPDESK].is_granted(K8sAccessNamespaceWrite));
        for auths in tables.values() {
            assert!(auths.granted().all(|a| a.is_namespace_scoped()));
        }
    }

    #[test]
    fn test_create_or_update_is_idempotent() {
        let store = MemoryStore::new();

        create_or_update_predefined_roles(&store).unwrap();
        let first = serde_json::to_vec(&store.roles().unwrap()).unwrap();

        create_or_update_predefined_roles(&store).unwrap();
        let second = serde_json::to_vec(&store.roles().unwrap()).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.roles().unwrap().len(), 5);
    }

    #[test]
    fn test_stale_role_is_replaced_with_complete_table() {
        let store = MemoryStore::new();
        let mut stale = predefined_roles().remove(3);
        stale.authorizations = Authorizations::new().with(StackList);
        store.create_role(&stale).unwrap();

        create_or_update_predefined_roles(&store).unwrap();

        let refreshed = store.role(ROLE_STANDARD_USER).unwrap();
        assert_eq!(
            refreshed.authorizations,
            default_endpoint_authorizations(ROLE_STANDARD_USER)
        );
    }
}

//! Namespace-level role resolution and policy document maintenance
//!
//! The namespace policy document lives in the cluster, not in the store. The
//! functions here are pure: callers fetch the document, hand it in, and
//! persist whatever comes back.

use std::collections::BTreeMap;

use warden_common::model::{
    KubernetesConfiguration, NamespaceAccessPolicies, Role, TeamId, UserId,
};
use warden_common::{is_system_namespace, Authorization, Authorizations, DEFAULT_NAMESPACE};

use crate::resolve::{first_layer_match, team_candidates, user_candidates};
use crate::roles::default_k8s_namespace_authorizations;

/// Inputs of a namespace role resolution for one user on one environment
#[derive(Debug, Clone, Copy)]
pub struct NamespaceRoleQuery<'a> {
    /// User being resolved
    pub user_id: UserId,
    /// Teams the user belongs to
    pub team_ids: &'a [TeamId],
    /// The user's resolved endpoint role
    pub endpoint_role: &'a Role,
    /// The user's effective endpoint authorizations
    pub endpoint_authorizations: &'a Authorizations,
    /// Namespaces currently present in the cluster
    pub namespaces: &'a [String],
    /// Namespace policy document
    pub policies: &'a NamespaceAccessPolicies,
    /// Kubernetes settings of the environment
    pub kubernetes: &'a KubernetesConfiguration,
    /// Every known role
    pub roles: &'a [Role],
}

/// Map every namespace the user may access to the role they hold there
///
/// Namespaces the user cannot access are absent from the result.
pub fn resolve_namespace_roles(query: &NamespaceRoleQuery<'_>) -> BTreeMap<String, Role> {
    let auths = query.endpoint_authorizations;
    let access_all = auths.is_granted(Authorization::K8sAccessAllNamespaces);
    let access_system = auths.is_granted(Authorization::K8sAccessSystemNamespaces);
    let access_user = auths.is_granted(Authorization::K8sAccessUserNamespaces);
    let default_open = !query.kubernetes.restrict_default_namespace;

    let mut resolved = BTreeMap::new();

    for namespace in query.namespaces {
        let system = is_system_namespace(namespace);
        let default = namespace == DEFAULT_NAMESPACE;

        let role = if access_all {
            Some(query.endpoint_role.clone())
        } else if system && !access_system {
            None
        } else if default && default_open {
            Some(query.endpoint_role.clone())
        } else if access_user && !system && !default {
            Some(query.endpoint_role.clone())
        } else {
            query.policies.get(namespace).and_then(|policy| {
                first_layer_match(
                    [
                        user_candidates(&policy.user_access_policies, query.user_id),
                        team_candidates(&policy.team_access_policies, query.team_ids),
                    ],
                    query.roles,
                )
            })
        };

        if let Some(role) = role {
            resolved.insert(namespace.clone(), role);
        }
    }

    resolved
}

/// Flatten namespace roles to their namespace authorization sets
pub fn namespace_authorizations(
    namespace_roles: &BTreeMap<String, Role>,
) -> BTreeMap<String, Authorizations> {
    let table = default_k8s_namespace_authorizations();
    namespace_roles
        .iter()
        .filter_map(|(namespace, role)| {
            table
                .get(&role.id)
                .map(|auths| (namespace.clone(), auths.clone()))
        })
        .collect()
}

/// Bring a user's entries in the namespace document in line with their role
///
/// Entries the user already holds are re-pointed at `endpoint_role`; when the
/// user no longer has an endpoint role the entries are removed. The default
/// namespace is left alone while it is open to every endpoint role. Namespaces
/// left without any policy are dropped from the document.
///
/// Returns whether the document changed, together with the merged document.
pub fn merge_user_namespace_policies(
    user_id: UserId,
    endpoint_role: Option<&Role>,
    kubernetes: &KubernetesConfiguration,
    mut policies: NamespaceAccessPolicies,
) -> (bool, NamespaceAccessPolicies) {
    let mut changed = false;

    for (namespace, policy) in policies.iter_mut() {
        if namespace == DEFAULT_NAMESPACE && !kubernetes.restrict_default_namespace {
            continue;
        }
        let Some(current) = policy.user_access_policies.get_mut(&user_id) else {
            continue;
        };
        match endpoint_role {
            Some(role) if current.role_id != role.id => {
                current.role_id = role.id;
                changed = true;
            }
            Some(_) => {}
            None => {
                policy.user_access_policies.remove(&user_id);
                changed = true;
            }
        }
    }

    if changed {
        policies.retain(|_, policy| !policy.is_empty());
    }

    (changed, policies)
}

/// Remove a user from every namespace of the document
pub fn remove_user_from_namespace_policies(
    policies: &mut NamespaceAccessPolicies,
    user_id: UserId,
) -> bool {
    let mut changed = false;
    for policy in policies.values_mut() {
        changed |= policy.user_access_policies.remove(&user_id).is_some();
    }
    if changed {
        policies.retain(|_, policy| !policy.is_empty());
    }
    changed
}

/// Remove a team from every namespace of the document
pub fn remove_team_from_namespace_policies(
    policies: &mut NamespaceAccessPolicies,
    team_id: TeamId,
) -> bool {
    let mut changed = false;
    for policy in policies.values_mut() {
        changed |= policy.team_access_policies.remove(&team_id).is_some();
    }
    if changed {
        policies.retain(|_, policy| !policy.is_empty());
    }
    changed
}

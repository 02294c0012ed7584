//! Kubernetes objects owned by warden
//!
//! Everything warden writes to a cluster is built here as server-side-apply
//! manifests, so the reconciliation in [`crate::backend`] stays a thin
//! sequence of API calls.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use serde_json::{json, Value};
use warden_authz::roles::default_k8s_namespace_authorizations;
use warden_common::model::{NamespaceAccessPolicies, NodeInfo, Role, UserId};
use warden_common::{Authorization, Error, Result, WARDEN_NAMESPACE};

/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "warden";

/// ConfigMap holding warden's per-cluster configuration
pub const CONFIG_MAP_NAME: &str = "warden-config";

/// ConfigMap key of the namespace policy document
pub const NAMESPACE_POLICIES_KEY: &str = "NamespaceAccessPolicies";

/// Label carrying the user id on per-user objects
pub const USER_ID_LABEL: &str = "warden.io/user-id";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// ClusterRole bound for namespace write access
pub const EDIT_CLUSTER_ROLE: &str = "edit";

/// ClusterRole bound for namespace read access
pub const VIEW_CLUSTER_ROLE: &str = "view";

/// Name of the user's service account
pub fn service_account_name(user_id: UserId) -> String {
    format!("warden-sa-user-{}", user_id)
}

/// Name of the secret holding the service account token
pub fn token_secret_name(user_id: UserId) -> String {
    format!("warden-sa-user-{}-token", user_id)
}

/// Name of the user's RoleBinding (one per namespace, same name in each)
pub fn role_binding_name(user_id: UserId) -> String {
    format!("warden-rb-user-{}", user_id)
}

/// Label selector matching every object of a user
pub fn user_selector(user_id: UserId) -> String {
    format!("{}={}", USER_ID_LABEL, user_id)
}

/// ClusterRole a namespace role is bound to, if any
pub fn cluster_role_for(role: &Role) -> Option<&'static str> {
    let table = default_k8s_namespace_authorizations();
    let auths = table.get(&role.id)?;
    if auths.is_granted(Authorization::K8sAccessNamespaceWrite) {
        Some(EDIT_CLUSTER_ROLE)
    } else if auths.is_granted(Authorization::K8sAccessNamespaceRead) {
        Some(VIEW_CLUSTER_ROLE)
    } else {
        None
    }
}

/// Namespace to ClusterRole for a set of namespace roles
pub fn desired_bindings(
    namespace_roles: &BTreeMap<String, Role>,
) -> BTreeMap<String, &'static str> {
    namespace_roles
        .iter()
        .filter_map(|(namespace, role)| cluster_role_for(role).map(|cr| (namespace.clone(), cr)))
        .collect()
}

/// Decode the namespace policy document from the config map
///
/// A missing config map or key is an empty document.
pub fn parse_namespace_policies(config_map: Option<&ConfigMap>) -> Result<NamespaceAccessPolicies> {
    let raw = config_map
        .and_then(|cm| cm.data.as_ref())
        .and_then(|data| data.get(NAMESPACE_POLICIES_KEY));

    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|e| {
            Error::upstream(format!("malformed {} document: {}", NAMESPACE_POLICIES_KEY, e))
        }),
        _ => Ok(NamespaceAccessPolicies::new()),
    }
}

fn labels(user_id: Option<UserId>) -> Value {
    let mut labels = json!({ MANAGED_BY_LABEL: FIELD_MANAGER });
    if let Some(user_id) = user_id {
        labels[USER_ID_LABEL] = json!(user_id.to_string());
    }
    labels
}

/// Config map carrying the namespace policy document
pub fn namespace_policies_config_map(policies: &NamespaceAccessPolicies) -> Result<Value> {
    let document = serde_json::to_string(policies)
        .map_err(|e| Error::validation(format!("failed to encode namespace policies: {}", e)))?;

    Ok(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": CONFIG_MAP_NAME,
            "namespace": WARDEN_NAMESPACE,
            "labels": labels(None),
        },
        "data": { NAMESPACE_POLICIES_KEY: document },
    }))
}

/// The user's service account
pub fn service_account_manifest(user_id: UserId) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": service_account_name(user_id),
            "namespace": WARDEN_NAMESPACE,
            "labels": labels(Some(user_id)),
        },
    })
}

/// Long-lived token secret bound to the user's service account
pub fn token_secret_manifest(user_id: UserId) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "kubernetes.io/service-account-token",
        "metadata": {
            "name": token_secret_name(user_id),
            "namespace": WARDEN_NAMESPACE,
            "labels": labels(Some(user_id)),
            "annotations": {
                "kubernetes.io/service-account.name": service_account_name(user_id),
            },
        },
    })
}

/// RoleBinding granting the user's service account a ClusterRole in one namespace
pub fn role_binding_manifest(user_id: UserId, namespace: &str, cluster_role: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": {
            "name": role_binding_name(user_id),
            "namespace": namespace,
            "labels": labels(Some(user_id)),
        },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": cluster_role,
        },
        "subjects": [{
            "kind": "ServiceAccount",
            "name": service_account_name(user_id),
            "namespace": WARDEN_NAMESPACE,
        }],
    })
}

/// Bearer token stored in a service-account token secret, once populated
pub fn decode_token(secret: &Secret) -> Option<String> {
    let bytes = secret.data.as_ref()?.get("token")?;
    let token = String::from_utf8(bytes.0.clone()).ok()?;
    (!token.is_empty()).then_some(token)
}

/// Node summary with allocatable resources
pub fn node_info(node: &Node) -> NodeInfo {
    let allocatable = node.status.as_ref().and_then(|s| s.allocatable.as_ref());
    let quantity = |key: &str| allocatable.and_then(|a| a.get(key)).map(|q| q.0.clone());

    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        cpu: quantity("cpu"),
        memory: quantity("memory"),
    }
}

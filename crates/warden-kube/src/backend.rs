//! kube-rs implementation of the orchestration backend

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};
use warden_common::backend::ClusterBackend;
use warden_common::model::{NamespaceAccessPolicies, NodeInfo, Role, UserId};
use warden_common::retry::{retry, RetryPolicy};
use warden_common::{Error, Result, WARDEN_NAMESPACE};

use crate::resources::{
    decode_token, desired_bindings, namespace_policies_config_map, node_info,
    parse_namespace_policies, role_binding_manifest, role_binding_name, service_account_manifest,
    service_account_name, token_secret_manifest, token_secret_name, user_selector,
    CONFIG_MAP_NAME, FIELD_MANAGER,
};

fn upstream(context: &str, e: kube::Error) -> Error {
    Error::upstream(format!("{}: {}", context, e))
}

/// Cluster reached through a kube client
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    token_retry: RetryPolicy,
}

impl KubeBackend {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            token_retry: RetryPolicy {
                attempts: 10,
                initial_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(2),
            },
        }
    }

    async fn apply<K>(&self, api: &Api<K>, name: &str, manifest: &serde_json::Value) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(manifest))
            .await
            .map_err(|e| upstream(&format!("failed to apply {}", name), e))?;
        Ok(())
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&ListParams::default())
            .await
            .map_err(|e| upstream("failed to list namespaces", e))?;
        Ok(namespaces.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn get_namespace_access_policies(&self) -> Result<NamespaceAccessPolicies> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), WARDEN_NAMESPACE);
        let config_map = api
            .get_opt(CONFIG_MAP_NAME)
            .await
            .map_err(|e| upstream("failed to read namespace access policies", e))?;
        parse_namespace_policies(config_map.as_ref())
    }

    async fn update_namespace_access_policies(
        &self,
        policies: &NamespaceAccessPolicies,
    ) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), WARDEN_NAMESPACE);
        let manifest = namespace_policies_config_map(policies)?;
        self.apply(&api, CONFIG_MAP_NAME, &manifest).await?;
        debug!(namespaces = policies.len(), "Stored namespace access policies");
        Ok(())
    }

    async fn setup_user_service_account(
        &self,
        user_id: UserId,
        namespace_roles: &BTreeMap<String, Role>,
    ) -> Result<()> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), WARDEN_NAMESPACE);
        self.apply(
            &accounts,
            &service_account_name(user_id),
            &service_account_manifest(user_id),
        )
        .await?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), WARDEN_NAMESPACE);
        self.apply(
            &secrets,
            &token_secret_name(user_id),
            &token_secret_manifest(user_id),
        )
        .await?;

        let desired = desired_bindings(namespace_roles);
        let binding_name = role_binding_name(user_id);

        for (namespace, cluster_role) in &desired {
            let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
            self.apply(
                &api,
                &binding_name,
                &role_binding_manifest(user_id, namespace, cluster_role),
            )
            .await?;
        }

        // Drop bindings in namespaces the user no longer has access to
        let all: Api<RoleBinding> = Api::all(self.client.clone());
        let existing = all
            .list(&ListParams::default().labels(&user_selector(user_id)))
            .await
            .map_err(|e| upstream("failed to list role bindings", e))?;

        for binding in existing.items {
            let Some(namespace) = binding.namespace() else {
                continue;
            };
            if desired.contains_key(&namespace) {
                continue;
            }
            let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
            match api.delete(&binding.name_any(), &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(upstream("failed to delete stale role binding", e)),
            }
            debug!(user = %user_id, namespace = %namespace, "Removed stale role binding");
        }

        info!(user = %user_id, namespaces = desired.len(), "Service account bindings reconciled");
        Ok(())
    }

    async fn get_service_account_bearer_token(&self, user_id: UserId) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), WARDEN_NAMESPACE);
        let name = token_secret_name(user_id);

        // The token controller fills the secret asynchronously after creation
        retry(&self.token_retry, "service account token", || async {
            let secret = api
                .get(&name)
                .await
                .map_err(|e| upstream("failed to read service account token", e))?;
            decode_token(&secret)
                .ok_or_else(|| Error::upstream(format!("token secret {} not populated yet", name)))
        })
        .await
    }

    async fn get_nodes(&self) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| upstream("failed to list nodes", e))?;
        Ok(nodes.items.iter().map(node_info).collect())
    }
}

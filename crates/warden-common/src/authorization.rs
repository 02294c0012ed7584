//! Fine-grained operation identifiers and authorization sets
//!
//! A role grants a set of operations. The set is stored as a complete
//! `Authorization -> bool` map so that a stored role is always a full copy,
//! never a delta, and so that the JSON form is stable across runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An operation that a role may be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Authorization {
    // Docker engine operations
    /// List containers
    DockerContainerList,
    /// Inspect a container
    DockerContainerInspect,
    /// Read container logs
    DockerContainerLogs,
    /// Create a container
    DockerContainerCreate,
    /// Start a container
    DockerContainerStart,
    /// Stop a container
    DockerContainerStop,
    /// Delete a container
    DockerContainerDelete,
    /// Start an exec instance in a container
    DockerExecStart,
    /// List images
    DockerImageList,
    /// Inspect an image
    DockerImageInspect,
    /// Pull an image
    DockerImagePull,
    /// Delete an image
    DockerImageDelete,
    /// List networks
    DockerNetworkList,
    /// Create a network
    DockerNetworkCreate,
    /// Delete a network
    DockerNetworkDelete,
    /// List volumes
    DockerVolumeList,
    /// Inspect a volume
    DockerVolumeInspect,
    /// Create a volume
    DockerVolumeCreate,
    /// Delete a volume
    DockerVolumeDelete,
    /// List secrets
    DockerSecretList,
    /// Create a secret
    DockerSecretCreate,
    /// Delete a secret
    DockerSecretDelete,
    /// Download a file from a volume through the agent
    DockerAgentBrowseGet,
    /// List files in a volume through the agent
    DockerAgentBrowseList,
    /// Delete a file in a volume through the agent
    DockerAgentBrowseDelete,
    /// Upload a file to a volume through the agent
    DockerAgentBrowsePut,
    /// Rename a file in a volume through the agent
    DockerAgentBrowseRename,

    // Kubernetes operations
    /// Access every namespace with the endpoint role
    K8sAccessAllNamespaces,
    /// Access system namespaces
    K8sAccessSystemNamespaces,
    /// Access every non-system, non-default namespace with the endpoint role
    K8sAccessUserNamespaces,
    /// Read resources in a namespace (namespace-scoped)
    K8sAccessNamespaceRead,
    /// Write resources in a namespace (namespace-scoped)
    K8sAccessNamespaceWrite,
    /// List namespaces
    K8sResourcePoolsR,
    /// Read namespace details
    K8sResourcePoolDetailsR,
    /// Create, update or delete namespaces
    K8sResourcePoolDetailsW,
    /// Read applications
    K8sApplicationsR,
    /// Deploy or modify applications
    K8sApplicationsW,
    /// Open a console (exec) into a pod
    K8sApplicationConsoleRW,
    /// Read application logs
    K8sApplicationLogsR,
    /// Read configmaps and secrets
    K8sConfigurationsR,
    /// Write configmaps and secrets
    K8sConfigurationsW,
    /// Read volumes
    K8sVolumesR,
    /// Write volumes
    K8sVolumesW,
    /// Read cluster-level information
    K8sClusterR,
    /// Read cluster nodes
    K8sClusterNodeR,
    /// Change cluster setup
    K8sClusterSetupRW,

    // Platform operations
    /// List stacks
    StackList,
    /// Inspect a stack
    StackInspect,
    /// Read a stack file
    StackFile,
    /// Create a stack
    StackCreate,
    /// Update a stack
    StackUpdate,
    /// Delete a stack
    StackDelete,
    /// Create a webhook
    WebhookCreate,
    /// Delete a webhook
    WebhookDelete,
    /// List registries
    RegistryList,
    /// Inspect a registry
    RegistryInspect,
    /// Unrestricted access to environment resources
    EndpointResourcesAccess,
}

impl Authorization {
    /// Every known operation, in declaration order
    pub const ALL: &'static [Authorization] = &[
        Authorization::DockerContainerList,
        Authorization::DockerContainerInspect,
        Authorization::DockerContainerLogs,
        Authorization::DockerContainerCreate,
        Authorization::DockerContainerStart,
        Authorization::DockerContainerStop,
        Authorization::DockerContainerDelete,
        Authorization::DockerExecStart,
        Authorization::DockerImageList,
        Authorization::DockerImageInspect,
        Authorization::DockerImagePull,
        Authorization::DockerImageDelete,
        Authorization::DockerNetworkList,
        Authorization::DockerNetworkCreate,
        Authorization::DockerNetworkDelete,
        Authorization::DockerVolumeList,
        Authorization::DockerVolumeInspect,
        Authorization::DockerVolumeCreate,
        Authorization::DockerVolumeDelete,
        Authorization::DockerSecretList,
        Authorization::DockerSecretCreate,
        Authorization::DockerSecretDelete,
        Authorization::DockerAgentBrowseGet,
        Authorization::DockerAgentBrowseList,
        Authorization::DockerAgentBrowseDelete,
        Authorization::DockerAgentBrowsePut,
        Authorization::DockerAgentBrowseRename,
        Authorization::K8sAccessAllNamespaces,
        Authorization::K8sAccessSystemNamespaces,
        Authorization::K8sAccessUserNamespaces,
        Authorization::K8sAccessNamespaceRead,
        Authorization::K8sAccessNamespaceWrite,
        Authorization::K8sResourcePoolsR,
        Authorization::K8sResourcePoolDetailsR,
        Authorization::K8sResourcePoolDetailsW,
        Authorization::K8sApplicationsR,
        Authorization::K8sApplicationsW,
        Authorization::K8sApplicationConsoleRW,
        Authorization::K8sApplicationLogsR,
        Authorization::K8sConfigurationsR,
        Authorization::K8sConfigurationsW,
        Authorization::K8sVolumesR,
        Authorization::K8sVolumesW,
        Authorization::K8sClusterR,
        Authorization::K8sClusterNodeR,
        Authorization::K8sClusterSetupRW,
        Authorization::StackList,
        Authorization::StackInspect,
        Authorization::StackFile,
        Authorization::StackCreate,
        Authorization::StackUpdate,
        Authorization::StackDelete,
        Authorization::WebhookCreate,
        Authorization::WebhookDelete,
        Authorization::RegistryList,
        Authorization::RegistryInspect,
        Authorization::EndpointResourcesAccess,
    ];

    /// Whether the operation only makes sense inside a single namespace
    pub fn is_namespace_scoped(self) -> bool {
        matches!(
            self,
            Authorization::K8sAccessNamespaceRead | Authorization::K8sAccessNamespaceWrite
        )
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A set of granted operations
///
/// Keys mapped to `false` are kept so that a stored table round-trips exactly;
/// only `true` entries count as granted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authorizations(BTreeMap<Authorization, bool>);

impl Authorizations {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant an operation
    pub fn grant(&mut self, authorization: Authorization) {
        self.0.insert(authorization, true);
    }

    /// Builder form of [`Authorizations::grant`]
    pub fn with(mut self, authorization: Authorization) -> Self {
        self.grant(authorization);
        self
    }

    /// Check whether an operation is granted
    pub fn is_granted(&self, authorization: Authorization) -> bool {
        self.0.get(&authorization).copied().unwrap_or(false)
    }

    /// Per-key logical OR of two sets
    pub fn union(&self, other: &Authorizations) -> Authorizations {
        let mut merged = self.0.clone();
        for (key, granted) in &other.0 {
            let entry = merged.entry(*key).or_insert(false);
            *entry = *entry || *granted;
        }
        Authorizations(merged)
    }

    /// Iterate over the granted operations
    pub fn granted(&self) -> impl Iterator<Item = Authorization> + '_ {
        self.0
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(key, _)| *key)
    }

    /// Whether the map has no entries at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries (granted or not)
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Authorization> for Authorizations {
    fn from_iter<I: IntoIterator<Item = Authorization>>(iter: I) -> Self {
        Authorizations(iter.into_iter().map(|a| (a, true)).collect())
    }
}

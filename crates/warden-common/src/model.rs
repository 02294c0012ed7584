//! Access-policy data model
//!
//! Records as read from the Policy Store Adapter. Policy maps are `BTreeMap`s
//! so iteration order, and therefore every serialized form, is stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::authorization::Authorizations;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Default,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of a platform user
    UserId
);
id_type!(
    /// Identifier of a team
    TeamId
);
id_type!(
    /// Identifier of a team membership edge
    MembershipId
);
id_type!(
    /// Identifier of a role
    RoleId
);
id_type!(
    /// Identifier of a managed environment
    EndpointId
);
id_type!(
    /// Identifier of an environment group
    EndpointGroupId
);
id_type!(
    /// Identifier of a registry
    RegistryId
);
id_type!(
    /// Identifier of a deployed stack
    StackId
);

// =============================================================================
// Roles and policies
// =============================================================================

/// A named, prioritized bundle of granted operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role identifier
    pub id: RoleId,
    /// Display name
    pub name: String,
    /// Human description
    pub description: String,
    /// Resolution priority; among candidates the largest value is selected
    pub priority: i32,
    /// Complete authorization table for this role
    pub authorizations: Authorizations,
}

/// A single subject → role binding attached to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Role granted by this policy
    pub role_id: RoleId,
}

impl AccessPolicy {
    /// Create a policy granting a role
    pub fn new(role_id: RoleId) -> Self {
        Self { role_id }
    }
}

/// User → policy map attached to a resource
pub type UserAccessPolicies = BTreeMap<UserId, AccessPolicy>;

/// Team → policy map attached to a resource
pub type TeamAccessPolicies = BTreeMap<TeamId, AccessPolicy>;

/// Policies attached to a single Kubernetes namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceAccessPolicy {
    /// Direct user policies
    #[serde(default)]
    pub user_access_policies: UserAccessPolicies,
    /// Team policies
    #[serde(default)]
    pub team_access_policies: TeamAccessPolicies,
}

impl NamespaceAccessPolicy {
    /// Whether the namespace carries no policy at all
    pub fn is_empty(&self) -> bool {
        self.user_access_policies.is_empty() && self.team_access_policies.is_empty()
    }
}

/// Namespace name → namespace policies, as stored in the cluster
pub type NamespaceAccessPolicies = BTreeMap<String, NamespaceAccessPolicy>;

// =============================================================================
// Subjects
// =============================================================================

/// Platform-level role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    /// Bypasses all policy resolution
    Administrator,
    /// Subject to policy resolution
    Standard,
}

/// A platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Login name
    pub username: String,
    /// Platform role
    pub role: UserRole,
    /// Cached per-environment authorizations (empty for administrators)
    #[serde(default)]
    pub endpoint_authorizations: BTreeMap<EndpointId, Authorizations>,
}

impl User {
    /// Whether the user is a platform administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Administrator
    }
}

/// A team of users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team identifier
    pub id: TeamId,
    /// Team name
    pub name: String,
}

/// Role of a user inside a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipRole {
    /// Team leader
    Leader,
    /// Regular member
    Member,
}

/// A (user, team) membership edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
    /// Membership identifier
    pub id: MembershipId,
    /// Member
    pub user_id: UserId,
    /// Team
    pub team_id: TeamId,
    /// Role inside the team
    pub role: MembershipRole,
}

// =============================================================================
// Environments
// =============================================================================

/// How the management process reaches an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointType {
    /// Control plane reachable directly from the management process
    KubernetesLocal,
    /// Remote agent reachable over HTTP(S)
    AgentOnKubernetes,
    /// Remote agent reachable only through a reverse tunnel
    EdgeAgentOnKubernetes,
}

/// TLS settings for reaching an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Use TLS
    pub tls: bool,
    /// Skip server certificate verification
    pub skip_verify: bool,
}

/// Kubernetes access-control settings of an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesConfiguration {
    /// When false, the default namespace is open to every endpoint role
    pub restrict_default_namespace: bool,
    /// Use the metrics server for resource usage views
    #[serde(default)]
    pub use_server_metrics: bool,
}

/// Security toggles of an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Let non-admin roles browse volumes through the agent
    pub allow_volume_browser_for_regular_users: bool,
}

/// A managed environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Environment identifier
    pub id: EndpointId,
    /// Display name
    pub name: String,
    /// Owning group
    pub group_id: EndpointGroupId,
    /// Connection type
    pub endpoint_type: EndpointType,
    /// Address of the control plane or agent
    pub url: String,
    /// TLS settings
    #[serde(default)]
    pub tls_config: TlsConfig,
    /// Direct user policies
    #[serde(default)]
    pub user_access_policies: UserAccessPolicies,
    /// Team policies
    #[serde(default)]
    pub team_access_policies: TeamAccessPolicies,
    /// Kubernetes settings
    #[serde(default)]
    pub kubernetes: KubernetesConfiguration,
    /// Security toggles
    #[serde(default)]
    pub security_settings: SecuritySettings,
}

/// A named collection of environments sharing group-level policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointGroup {
    /// Group identifier
    pub id: EndpointGroupId,
    /// Group name
    pub name: String,
    /// Direct user policies
    #[serde(default)]
    pub user_access_policies: UserAccessPolicies,
    /// Team policies
    #[serde(default)]
    pub team_access_policies: TeamAccessPolicies,
}

// =============================================================================
// Registries and stacks
// =============================================================================

/// Per-environment access to a registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAccessPolicies {
    /// Direct user policies
    #[serde(default)]
    pub user_access_policies: UserAccessPolicies,
    /// Team policies
    #[serde(default)]
    pub team_access_policies: TeamAccessPolicies,
    /// Namespaces allowed to pull from the registry
    #[serde(default)]
    pub namespaces: Vec<String>,
}

/// A container registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Registry identifier
    pub id: RegistryId,
    /// Display name
    pub name: String,
    /// Registry address
    pub url: String,
    /// Access per environment
    #[serde(default)]
    pub registry_accesses: BTreeMap<EndpointId, RegistryAccessPolicies>,
}

/// A deployed stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// Stack identifier
    pub id: StackId,
    /// Stack name
    pub name: String,
    /// Environment the stack is deployed to
    pub endpoint_id: EndpointId,
    /// Namespace for Kubernetes stacks
    pub namespace: Option<String>,
}

/// A cluster node as reported by the orchestration backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Allocatable CPU (Kubernetes quantity string)
    pub cpu: Option<String>,
    /// Allocatable memory (Kubernetes quantity string)
    pub memory: Option<String>,
}

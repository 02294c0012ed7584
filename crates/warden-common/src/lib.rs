//! Common types for warden: data model, errors, and collaborator traits
//!
//! Everything the policy engine, token layer and gateway share lives here:
//! - the access-policy data model (users, teams, roles, endpoints, registries)
//! - the `Authorization` operation set and its union semantics
//! - the Policy Store Adapter (`PolicyStore`) and an in-memory implementation
//! - the orchestration backend contract (`ClusterBackend`, `BackendFactory`)
//! - platform security tokens (`JwtService`)

#![deny(missing_docs)]

pub mod authorization;
pub mod backend;
pub mod error;
pub mod identity;
pub mod model;
pub mod retry;
pub mod store;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authorization::{Authorization, Authorizations};
pub use error::Error;

/// Result type alias using the shared Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding warden's own cluster resources (service accounts, config)
pub const WARDEN_NAMESPACE: &str = "warden";

/// The Kubernetes default namespace
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespaces treated as system namespaces for access-control purposes
pub const SYSTEM_NAMESPACES: &[&str] = &[
    "kube-system",
    "kube-public",
    "kube-node-lease",
    WARDEN_NAMESPACE,
];

/// Check whether a namespace is a system namespace
pub fn is_system_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&namespace)
}

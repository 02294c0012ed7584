//! Kubernetes orchestration backend
//!
//! [`KubeBackend`] implements the cluster operations the policy engine and
//! token manager need on top of kube-rs:
//! - namespaces and nodes
//! - the namespace policy document (ConfigMap `warden-config` in `warden`)
//! - per-user service accounts, their token secret and namespace RoleBindings
//!
//! [`KubeBackendFactory`] hands out one backend per environment.

#![deny(missing_docs)]

pub mod backend;
pub mod factory;
pub mod resources;

pub use backend::KubeBackend;
pub use factory::KubeBackendFactory;

//! Policy resolution engine
//!
//! Computes a user's or team's effective role per environment and per
//! Kubernetes namespace from the layered access policies, and keeps the
//! derived state (stored per-user authorizations, namespace policy
//! documents, downstream caches) consistent when policies change.
//!
//! The resolvers in [`resolve`] and [`namespace`] are pure functions over
//! already-loaded records. [`AuthorizationService`] is the store-facing API
//! the token manager and the gateway use.

#![deny(missing_docs)]

pub mod events;
pub mod namespace;
pub mod resolve;
pub mod roles;
pub mod service;

pub use events::{AuthEventHandler, AuthEvents};
pub use service::{AuthorizationService, EndpointAccess};

//! Credentials for proxied requests
//!
//! - [`TokenManager`]: admin token for administrators, a freshly provisioned
//!   and namespace-scoped service-account token for everyone else
//! - [`TokenCache`]: per-environment, per-user memoization of those tokens,
//!   invalidated through the authorization events
//! - [`admin`]: loading the admin token at startup

#![deny(missing_docs)]

pub mod admin;
pub mod cache;
pub mod manager;

pub use admin::{load_admin_token, FileTokenReader, TokenReader, ADMIN_TOKEN_PATH};
pub use cache::{TokenCache, UserTokenCache};
pub use manager::TokenManager;

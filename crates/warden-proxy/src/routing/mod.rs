//! Path utilities for the Kubernetes gateway
//!
//! Single source of truth for the external route prefix, the 301 `Location`
//! rewrite, and the classification of API paths into the operations that
//! carry an extra authorization check.

mod operation;
mod path;

pub use operation::{classify, is_write_method, ConfigKind, K8sOperation};
pub use path::{
    endpoint_prefix, is_canonical_path, rewrite_location, strip_endpoint_prefix, websocket_url,
};

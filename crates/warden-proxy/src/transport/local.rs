use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;

use super::{BaseTransport, Transport, UpgradeTarget};
use crate::error::Result;

/// Transport to the control plane the gateway runs next to
///
/// The in-cluster API server presents a certificate issued by the cluster's
/// own CA, which is not verified for this local-only hop.
pub struct LocalTransport {
    base: BaseTransport,
    target: String,
}

impl LocalTransport {
    /// Create a transport for the API server at `url`
    pub fn new(base: BaseTransport, url: &str) -> Self {
        Self {
            base,
            target: url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>> {
        self.base.round_trip(request, &self.target).await
    }

    async fn upgrade_target(
        &self,
        _headers: &HeaderMap,
        token: Option<&str>,
        path_and_query: &str,
    ) -> Result<UpgradeTarget> {
        self.base
            .upgrade_target(token, path_and_query, &self.target, true)
            .await
    }
}

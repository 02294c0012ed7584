//! HTTP forwarding to the environment
//!
//! `Forwarder` is the seam between the transports and the network, so the
//! credential, guard and audit logic can be tested without a cluster.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request as sent to the environment
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// HTTP method
    pub method: Method,
    /// Full target URL
    pub url: String,
    /// Outbound headers, credential included
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

/// Response from the environment, body still streaming
pub struct ForwardResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Body,
}

/// Sends requests to an environment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send one request
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse>;
}

/// reqwest-backed forwarder
///
/// Redirects are returned to the caller untouched so their `Location` can be
/// rewritten. Bodies stream in both directions, which keeps watches open.
pub struct ReqwestForwarder {
    client: reqwest::Client,
}

impl ReqwestForwarder {
    /// Build a forwarder
    ///
    /// `accept_invalid_certs` is for local control planes with self-signed
    /// certificates and agents configured to skip verification.
    pub fn new(accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Forwarder for ReqwestForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        debug!(method = %request.method, url = %request.url, "Forwarding request");

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        Ok(ForwardResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

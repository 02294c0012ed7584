use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use warden_common::model::Endpoint;

use super::{BaseTransport, Transport, UpgradeTarget};
use crate::error::Result;

/// Path under which agents serve the Kubernetes API
pub const AGENT_KUBERNETES_PATH: &str = "/kubernetes";

/// Kubernetes API base URL of an agent
///
/// Agent URLs are stored as `host:port`; the scheme follows the
/// environment's TLS setting unless the URL already carries one.
pub fn agent_url(endpoint: &Endpoint) -> String {
    let url = endpoint.url.trim_end_matches('/');
    let base = if url.contains("://") {
        url.to_string()
    } else if endpoint.tls_config.tls {
        format!("https://{}", url)
    } else {
        format!("http://{}", url)
    };
    format!("{}{}", base, AGENT_KUBERNETES_PATH)
}

/// Transport to a remote agent, every request signed
pub struct AgentTransport {
    base: BaseTransport,
    target: String,
    accept_invalid_certs: bool,
}

impl AgentTransport {
    /// Create a transport for an agent environment
    pub fn new(base: BaseTransport, endpoint: &Endpoint) -> Self {
        Self {
            base,
            target: agent_url(endpoint),
            accept_invalid_certs: endpoint.tls_config.skip_verify,
        }
    }
}

#[async_trait]
impl Transport for AgentTransport {
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
            .upgrade_target(token, path_and_query, &self.target, self.accept_invalid_certs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::ReqwestForwarder;
    use crate::signature::{SignatureService, PUBLIC_KEY_HEADER, SIGNATURE_HEADER};
    use crate::testing::Fixture;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use warden_common::model::{EndpointType, UserRole};
    use warden_common::store::PolicyStore;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_agent_url() {
        let mut endpoint = Fixture::new().endpoint();
        endpoint.url = "10.0.0.5:9001".into();
        assert_eq!(agent_url(&endpoint), "http://10.0.0.5:9001/kubernetes");

        endpoint.tls_config.tls = true;
        assert_eq!(agent_url(&endpoint), "https://10.0.0.5:9001/kubernetes");

        endpoint.url = "http://agent.local:9001/".into();
        assert_eq!(agent_url(&endpoint), "http://agent.local:9001/kubernetes");
    }

    #[tokio::test]
    async fn test_round_trip_through_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kubernetes/api/v1/namespaces/team-a/pods"))
            .and(query_param("limit", "10"))
            .and(header("authorization", "Bearer sa-token-7"))
            .and(header_exists(PUBLIC_KEY_HEADER.as_str()))
            .and(header_exists(SIGNATURE_HEADER.as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"kind": "PodList"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let f = Fixture::new();
        let mut endpoint = f.endpoint();
        endpoint.endpoint_type = EndpointType::AgentOnKubernetes;
        endpoint.url = server.uri();
        f.store.update_endpoint(&endpoint).unwrap();

        let base = BaseTransport::new(
            endpoint.id,
            f.services.clone(),
            Arc::new(ReqwestForwarder::new(false).unwrap()),
            Some(Arc::new(SignatureService::generate().unwrap())),
        );
        let transport = AgentTransport::new(base, &endpoint);

        let request = Request::builder()
            .uri("/api/endpoints/1/kubernetes/api/v1/namespaces/team-a/pods?limit=10")
            .header("authorization", format!("Bearer {}", f.bearer(7, UserRole::Standard)))
            .body(Body::empty())
            .unwrap();
        let response = transport.round_trip(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["kind"], "PodList");
    }
}

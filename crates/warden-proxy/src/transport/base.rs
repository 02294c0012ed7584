//! Round-trip logic shared by every transport
//!
//! In order, for each request:
//! 1. reject non-canonical paths, validate the caller's platform token and
//!    load the environment
//! 2. obtain the backend credential (admin token or the caller's
//!    service-account token)
//! 3. run the operation guard and read the body; for namespace deletes
//!    then remove the namespace's platform references
//! 4. forward with the credential (and signature, for agents) attached and
//!    caller-supplied impersonation headers and platform token removed
//! 5. rewrite the `Location` of a 301 back under the environment prefix
//! 6. audit successful writes with a redacted payload
//!
//! A failure in steps 1-3 never reaches the environment.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use chrono::Utc;
use tracing::{debug, instrument};
use warden_common::backend::ClusterBackend;
use warden_common::identity::TokenData;
use warden_common::model::{Endpoint, EndpointId};
use zeroize::Zeroizing;

use super::{GatewayServices, UpgradeTarget};
use crate::audit::{should_audit, AuditRecord};
use crate::auth::{authenticate, extract_bearer_token, strip_query_token};
use crate::error::{Error, Result};
use crate::forwarder::{ForwardRequest, Forwarder};
use crate::guard::{authorize_operation, cascade_namespace_delete};
use crate::redact::redact_payload;
use crate::routing::{
    classify, is_canonical_path, rewrite_location, strip_endpoint_prefix, websocket_url,
    K8sOperation,
};
use crate::signature::{SignatureService, PUBLIC_KEY_HEADER, SIGNATURE_HEADER};

/// Maximum request body size (10 MB - reasonable for K8s API)
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Impersonation header names that must be stripped from incoming requests
const IMPERSONATION_HEADERS: &[&str] = &[
    "impersonate-user",
    "impersonate-group",
    "impersonate-uid",
    // impersonate-extra-* headers are handled with a prefix check
];

const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

/// Connection-level headers that are never forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers of the inbound request that belong to the gateway hop only
const GATEWAY_HEADERS: &[&str] = &["host", "content-length", "cookie"];

fn is_impersonation_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    IMPERSONATION_HEADERS.contains(&name) || name.starts_with(IMPERSONATE_EXTRA_PREFIX)
}

fn is_forwardable_request_header(name: &HeaderName) -> bool {
    let str_name = name.as_str();
    !(HOP_BY_HOP_HEADERS.contains(&str_name)
        || GATEWAY_HEADERS.contains(&str_name)
        || *name == AUTHORIZATION
        || *name == PUBLIC_KEY_HEADER
        || *name == SIGNATURE_HEADER
        || is_impersonation_header(name))
}

fn response_headers(upstream: HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream.iter() {
        if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// A request that passed authentication and the operation guard
pub struct Authorized {
    /// Caller
    pub identity: TokenData,
    /// Target environment as currently stored
    pub endpoint: Endpoint,
    /// Backend credential
    pub credential: Zeroizing<String>,
    /// Classified operation
    pub operation: K8sOperation,
    /// Orchestration client for the environment
    pub backend: Arc<dyn ClusterBackend>,
}

/// Credential attach, guards, forwarding and audit for one environment
pub struct BaseTransport {
    endpoint_id: EndpointId,
    services: GatewayServices,
    forwarder: Arc<dyn Forwarder>,
    signer: Option<Arc<SignatureService>>,
}

impl BaseTransport {
    /// Create a base transport
    ///
    /// With a signer every outbound request carries the agent signature
    /// headers.
    pub fn new(
        endpoint_id: EndpointId,
        services: GatewayServices,
        forwarder: Arc<dyn Forwarder>,
        signer: Option<Arc<SignatureService>>,
    ) -> Self {
        Self {
            endpoint_id,
            services,
            forwarder,
            signer,
        }
    }

    /// Environment this transport serves
    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint_id
    }

    /// Authenticate, obtain the credential and run the operation guard
    ///
    /// Non-canonical paths are rejected before anything else.
    #[instrument(skip_all, fields(endpoint = %self.endpoint_id, method = %method, path = %path))]
    pub async fn authorize(
        &self,
        token: Option<&str>,
        method: &Method,
        path: &str,
    ) -> Result<Authorized> {
        if !is_canonical_path(path) {
            return Err(Error::BadRequest(format!("path {} is not canonical", path)));
        }

        let identity = authenticate(&self.services.jwt, token)?;
        let endpoint = self.services.store.endpoint(self.endpoint_id)?;
        let backend = self.services.backends.backend_for(&endpoint).await?;

        let credential = self
            .services
            .tokens
            .get_token(&identity, &endpoint, backend.as_ref())
            .await?;

        let operation = classify(method, path);
        authorize_operation(
            &self.services.authz,
            &identity,
            &endpoint,
            backend.as_ref(),
            &operation,
        )
        .await?;

        Ok(Authorized {
            identity,
            endpoint,
            credential,
            operation,
            backend,
        })
    }

    /// Headers sent to the environment
    ///
    /// Caller headers minus the gateway-hop, impersonation and signature
    /// headers, plus the backend credential and, for agents, a fresh
    /// signature.
    pub fn outbound_headers(&self, inbound: &HeaderMap, credential: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
        for (name, value) in inbound.iter() {
            if is_forwardable_request_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let bearer = Zeroizing::new(format!("Bearer {}", credential));
        let mut bearer = HeaderValue::from_str(&bearer)
            .map_err(|_| Error::Internal("credential is not a valid header value".into()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if let Some(signer) = &self.signer {
            signer.sign_headers(&mut headers)?;
        }
        Ok(headers)
    }

    /// Forward a request to `target` (scheme, host and base path of the
    /// environment's Kubernetes API)
    pub async fn round_trip(&self, request: Request<Body>, target: &str) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let path = strip_endpoint_prefix(parts.uri.path(), self.endpoint_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "path {} is not routed to endpoint {}",
                    parts.uri.path(),
                    self.endpoint_id
                ))
            })?
            .to_string();

        let authorized = self
            .authorize(extract_bearer_token(&parts.headers), &parts.method, &path)
            .await?;

        let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|e| Error::BadRequest(format!("failed to read request body: {}", e)))?;

        if let K8sOperation::NamespaceDelete { namespace } = &authorized.operation {
            cascade_namespace_delete(
                self.services.store.as_ref(),
                authorized.backend.as_ref(),
                authorized.endpoint.id,
                namespace,
            )
            .await?;
        }

        let url = match parts.uri.query().map(strip_query_token) {
            Some(query) if !query.is_empty() => format!("{}{}?{}", target, path, query),
            _ => format!("{}{}", target, path),
        };
        let headers = self.outbound_headers(&parts.headers, &authorized.credential)?;

        let upstream = self
            .forwarder
            .forward(ForwardRequest {
                method: parts.method.clone(),
                url,
                headers,
                body: body.clone(),
            })
            .await?;

        let status = upstream.status;
        let mut headers = response_headers(upstream.headers);
        if status == StatusCode::MOVED_PERMANENTLY {
            self.rewrite_redirect(&mut headers);
        }

        if should_audit(&parts.method, status) {
            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            self.audit(&authorized, &parts.method, &path, content_type, &body, status);
        }

        debug!(
            endpoint = %self.endpoint_id,
            user = %authorized.identity.username,
            status = status.as_u16(),
            "Request forwarded"
        );

        let mut response = Response::new(upstream.body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Authorize an exec upgrade and build the backend dial target
    pub async fn upgrade_target(
        &self,
        token: Option<&str>,
        path_and_query: &str,
        target: &str,
        accept_invalid_certs: bool,
    ) -> Result<UpgradeTarget> {
        let path = path_and_query
            .split_once('?')
            .map_or(path_and_query, |(path, _)| path);

        let authorized = self.authorize(token, &Method::GET, path).await?;
        if !matches!(authorized.operation, K8sOperation::PodExec { .. }) {
            return Err(Error::BadRequest(format!(
                "{} does not accept a WebSocket upgrade",
                path
            )));
        }

        Ok(UpgradeTarget {
            url: websocket_url(&format!("{}{}", target, path_and_query)),
            headers: self.outbound_headers(&HeaderMap::new(), &authorized.credential)?,
            accept_invalid_certs,
        })
    }

    fn rewrite_redirect(&self, headers: &mut HeaderMap) {
        let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
            return;
        };
        let rewritten = rewrite_location(location, self.endpoint_id);
        if let Ok(value) = HeaderValue::from_str(&rewritten) {
            headers.insert(LOCATION, value);
        }
    }

    fn audit(
        &self,
        authorized: &Authorized,
        method: &Method,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
        status: StatusCode,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            username: authorized.identity.username.clone(),
            endpoint_id: authorized.endpoint.id,
            endpoint_name: authorized.endpoint.name.clone(),
            method: method.to_string(),
            path: path.to_string(),
            status: status.as_u16(),
            payload: redact_payload(content_type, body),
        };
        self.services.audit.log(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAuditLogger;
    use crate::forwarder::{ForwardResponse, MockForwarder};
    use crate::redact::REDACTED;
    use crate::testing::Fixture;
    use warden_common::model::UserRole;

    const TARGET: &str = "https://kubernetes.default.svc";
    const SECRET_BODY: &str = r#"{"kind":"Secret","stringData":{"key":"secret-value"}}"#;

    fn ok_response(status: StatusCode) -> ForwardResponse {
        ForwardResponse {
            status,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    fn request(
        f: &Fixture,
        method: Method,
        path: &str,
        user: u32,
        role: UserRole,
    ) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(format!("/api/endpoints/1/kubernetes{}", path))
            .header("authorization", format!("Bearer {}", f.bearer(user, role)))
            .body(Body::empty())
            .unwrap()
    }

    fn base(f: &Fixture, forwarder: MockForwarder, signer: bool) -> BaseTransport {
        let signer = signer.then(|| Arc::new(SignatureService::generate().unwrap()));
        BaseTransport::new(f.endpoint().id, f.services.clone(), Arc::new(forwarder), signer)
    }

    #[tokio::test]
    async fn test_user_request_carries_service_account_token() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(|req| {
                req.url == "https://kubernetes.default.svc/api/v1/namespaces/team-a/pods?limit=5"
                    && req.headers["authorization"] == "Bearer sa-token-7"
                    && !req.headers.contains_key("impersonate-user")
                    && !req.headers.contains_key("impersonate-extra-scopes")
                    && !req.headers.contains_key(PUBLIC_KEY_HEADER)
                    && req.headers["accept"] == "application/json"
            })
            .times(1)
            .returning(|_| Ok(ok_response(StatusCode::OK)));

        let mut req = request(
            &f,
            Method::GET,
            "/api/v1/namespaces/team-a/pods?limit=5",
            7,
            UserRole::Standard,
        );
        let headers = req.headers_mut();
        headers.insert("impersonate-user", HeaderValue::from_static("system:admin"));
        headers.insert("impersonate-extra-scopes", HeaderValue::from_static("all"));
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let response = base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_request_carries_admin_token() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(|req| req.headers["authorization"] == "Bearer admin-token")
            .times(1)
            .returning(|_| Ok(ok_response(StatusCode::OK)));

        let req = request(&f, Method::GET, "/api/v1/nodes", 1, UserRole::Administrator);
        base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap();
        assert_eq!(f.backend.token_requests(), 0);
    }

    #[tokio::test]
    async fn test_signed_transport_adds_signature_headers() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(|req| {
                req.headers.contains_key(PUBLIC_KEY_HEADER)
                    && req.headers.contains_key(SIGNATURE_HEADER)
                    && req.headers["authorization"] == "Bearer sa-token-7"
            })
            .times(1)
            .returning(|_| Ok(ok_response(StatusCode::OK)));

        let mut req = request(&f, Method::GET, "/api/v1/namespaces", 7, UserRole::Standard);
        // a caller cannot supply its own signature
        req.headers_mut()
            .insert(SIGNATURE_HEADER, HeaderValue::from_static("forged"));
        base(&f, forwarder, true)
            .round_trip(req, TARGET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_denied_exec_is_not_forwarded() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().times(0);

        let req = request(
            &f,
            Method::GET,
            "/api/v1/namespaces/team-b/pods/web-0/exec?command=sh",
            7,
            UserRole::Standard,
        );
        let err = base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().times(0);

        let req = Request::builder()
            .uri("/api/endpoints/1/kubernetes/api/v1/namespaces")
            .body(Body::empty())
            .unwrap();
        let err = base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_moved_permanently_location_is_rewritten() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().times(1).returning(|_| {
            let mut response = ok_response(StatusCode::MOVED_PERMANENTLY);
            response
                .headers
                .insert(LOCATION, HeaderValue::from_static("/api/v1/namespaces/"));
            Ok(response)
        });

        let req = request(&f, Method::GET, "/api/v1/namespaces", 7, UserRole::Standard);
        let response = base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[LOCATION],
            "/api/endpoints/1/kubernetes/api/v1/namespaces/"
        );
    }

    #[tokio::test]
    async fn test_secret_write_is_audited_redacted() {
        let mut audit = MockAuditLogger::new();
        audit
            .expect_log()
            .withf(|record| {
                let payload: serde_json::Value = serde_json::from_str(&record.payload).unwrap();
                record.username == "user-7"
                    && record.endpoint_name == "env-1"
                    && record.method == "POST"
                    && record.path == "/api/v1/namespaces/team-a/secrets"
                    && record.status == 201
                    && payload["stringData"]["key"] == REDACTED
            })
            .times(1)
            .return_const(());
        let f = Fixture::with_audit(Arc::new(audit));

        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(|req| req.body.as_ref() == SECRET_BODY.as_bytes())
            .times(1)
            .returning(|_| Ok(ok_response(StatusCode::CREATED)));

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/endpoints/1/kubernetes/api/v1/namespaces/team-a/secrets")
            .header("authorization", format!("Bearer {}", f.bearer(7, UserRole::Standard)))
            .header("content-type", "application/json")
            .body(Body::from(SECRET_BODY))
            .unwrap();

        let response = base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_reads_and_failed_writes_are_not_audited() {
        let mut audit = MockAuditLogger::new();
        audit.expect_log().times(0);
        let f = Fixture::with_audit(Arc::new(audit));

        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().times(2).returning(|req| {
            let status = if req.method == Method::GET {
                StatusCode::OK
            } else {
                StatusCode::CONFLICT
            };
            Ok(ok_response(status))
        });
        let base = base(&f, forwarder, false);

        let pods = "/api/v1/namespaces/team-a/pods";
        let read = request(&f, Method::GET, pods, 7, UserRole::Standard);
        base.round_trip(read, TARGET).await.unwrap();

        let write = request(&f, Method::POST, pods, 7, UserRole::Standard);
        let response = base.round_trip(write, TARGET).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_namespace_delete_cascades_before_forwarding() {
        let f = Fixture::new();
        let backend = f.backend.clone();
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(move |req| {
                req.method == Method::DELETE && !backend.policies().contains_key("team-a")
            })
            .times(1)
            .returning(|_| Ok(ok_response(StatusCode::OK)));

        let req = request(
            &f,
            Method::DELETE,
            "/api/v1/namespaces/team-a",
            1,
            UserRole::Administrator,
        );
        base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dot_segments_never_reach_the_guard() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().times(0);
        let base = base(&f, forwarder, false);

        let paths = [
            (Method::POST, "/api/v1/namespaces/team-b/x/../secrets"),
            (Method::POST, "/api/v1/namespaces/team-b/x/%2e%2e/configmaps"),
            (Method::GET, "/api/v1/namespaces/team-b/pods/web-0/x/../exec"),
            (Method::DELETE, "/api/v1/namespaces/team-b/x/.."),
        ];
        for (method, path) in paths {
            let req = request(&f, method, path, 7, UserRole::Standard);
            let err = base.round_trip(req, TARGET).await.unwrap_err();
            assert!(matches!(err, Error::BadRequest(_)), "{}: {:?}", path, err);
        }
        assert!(f.backend.policies().contains_key("team-a"));
    }

    #[tokio::test]
    async fn test_unreadable_body_leaves_namespace_references() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder.expect_forward().times(0);

        let req = Request::builder()
            .method(Method::DELETE)
            .uri("/api/endpoints/1/kubernetes/api/v1/namespaces/team-a")
            .header(
                "authorization",
                format!("Bearer {}", f.bearer(1, UserRole::Administrator)),
            )
            .body(Body::from(vec![b'x'; MAX_BODY_SIZE + 1]))
            .unwrap();
        let err = base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BadRequest(_)));
        assert!(f.backend.policies().contains_key("team-a"));
    }

    #[tokio::test]
    async fn test_platform_token_is_removed_from_query() {
        let f = Fixture::new();
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(|req| {
                req.url == "https://kubernetes.default.svc/api/v1/namespaces/team-a/pods?limit=5"
            })
            .times(1)
            .returning(|_| Ok(ok_response(StatusCode::OK)));

        let req = request(
            &f,
            Method::GET,
            "/api/v1/namespaces/team-a/pods?token=platform-jwt&limit=5",
            7,
            UserRole::Standard,
        );
        base(&f, forwarder, false)
            .round_trip(req, TARGET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_target_for_exec() {
        let f = Fixture::new();
        let base = base(&f, MockForwarder::new(), true);
        let token = f.bearer(7, UserRole::Standard);

        let target = base
            .upgrade_target(
                Some(&token),
                "/api/v1/namespaces/team-a/pods/web-0/exec?command=sh",
                TARGET,
                true,
            )
            .await
            .unwrap();
        assert_eq!(
            target.url,
            "wss://kubernetes.default.svc/api/v1/namespaces/team-a/pods/web-0/exec?command=sh"
        );
        assert_eq!(target.headers[AUTHORIZATION], "Bearer sa-token-7");
        assert!(target.headers.contains_key(SIGNATURE_HEADER));

        let err = base
            .upgrade_target(Some(&token), "/api/v1/namespaces", TARGET, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}

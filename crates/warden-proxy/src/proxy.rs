//! Kubernetes API handlers
//!
//! Every request under `/api/endpoints/{id}/kubernetes` is handed to the
//! environment's transport. Exec requests carrying WebSocket upgrade headers
//! are bridged instead, and the nodes view is answered from the backend.

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::{HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use warden_common::model::{Endpoint, EndpointId, NodeInfo};

use crate::auth::{authenticate, extract_bearer_token, extract_query_token, strip_query_token};
use crate::error::{Error, Result};
use crate::exec_proxy::{
    bridge, connect_backend, has_websocket_upgrade_headers, send_k8s_error_and_close,
    K8S_PROTOCOLS,
};
use crate::guard::authorize_nodes;
use crate::routing::strip_endpoint_prefix;
use crate::server::AppState;

/// Path parameters for proxy routes
#[derive(Debug, Deserialize)]
pub struct ProxyPath {
    /// Target environment
    pub endpoint_id: u32,
    /// Remainder of the path (e.g., "api/v1/pods")
    #[serde(default)]
    pub path: String,
}

/// Path parameters for exec routes
#[derive(Debug, Deserialize)]
pub struct ExecPath {
    /// Target environment
    pub endpoint_id: u32,
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub pod: String,
}

/// Path parameters for the nodes view
#[derive(Debug, Deserialize)]
pub struct NodesPath {
    /// Target environment
    pub endpoint_id: u32,
}

/// Load an environment, dropping cached clients for one that was removed
fn load_endpoint(state: &AppState, endpoint_id: EndpointId) -> Result<Endpoint> {
    match state.services.store.endpoint(endpoint_id) {
        Ok(endpoint) => Ok(endpoint),
        Err(e) => {
            let e = Error::from(e);
            if matches!(e, Error::NotFound(_)) {
                state.transports.evict(endpoint_id);
            }
            Err(e)
        }
    }
}

async fn forward(
    state: &AppState,
    endpoint_id: EndpointId,
    request: Request<Body>,
) -> Result<Response<Body>> {
    let endpoint = load_endpoint(state, endpoint_id)?;
    let transport = state.transports.transport_for(&endpoint)?;
    transport.round_trip(request).await
}

/// Handle proxy requests to /api/endpoints/{endpoint_id}/kubernetes/*
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path(params): Path<ProxyPath>,
    request: Request<Body>,
) -> Result<Response<Body>> {
    debug!(
        endpoint = params.endpoint_id,
        method = %request.method(),
        path = %params.path,
        "Proxy request received"
    );
    forward(&state, EndpointId(params.endpoint_id), request).await
}

/// Handle pod exec
///
/// Without upgrade headers the request is proxied like any other. With them
/// the caller is authorized as for pod exec, the environment's exec
/// WebSocket is dialled with the backend credential, and frames are relayed.
/// Browsers cannot set headers on a WebSocket, so the platform token may
/// also arrive as the `token` query parameter.
pub async fn exec_handler(
    State(state): State<AppState>,
    Path(params): Path<ExecPath>,
    request: Request<Body>,
) -> Result<Response> {
    let endpoint_id = EndpointId(params.endpoint_id);
    if !has_websocket_upgrade_headers(request.headers()) {
        return forward(&state, endpoint_id, request).await;
    }

    let endpoint = load_endpoint(&state, endpoint_id)?;
    let transport = state.transports.transport_for(&endpoint)?;

    let (mut parts, _body) = request.into_parts();
    let token = extract_bearer_token(&parts.headers)
        .or_else(|| extract_query_token(parts.uri.query()))
        .map(str::to_string);
    let path = strip_endpoint_prefix(parts.uri.path(), endpoint_id)
        .ok_or_else(|| Error::NotFound(format!("no exec route for {}", parts.uri.path())))?;
    let path_and_query = match parts.uri.query().map(strip_query_token) {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    };

    let target = transport
        .upgrade_target(&parts.headers, token.as_deref(), &path_and_query)
        .await?;
    let offered = parts.headers.get(SEC_WEBSOCKET_PROTOCOL).cloned();
    let ws = WebSocketUpgrade::from_request_parts(&mut parts, &state)
        .await
        .map_err(|e| Error::BadRequest(e.body_text()))?;

    info!(
        endpoint = %endpoint_id,
        namespace = %params.namespace,
        pod = %params.pod,
        "Exec WebSocket requested"
    );

    let response = match connect_backend(&target, offered.as_ref()).await {
        Ok((backend, Some(protocol))) => ws
            .protocols([protocol])
            .on_upgrade(move |socket| bridge(socket, backend)),
        Ok((backend, None)) => ws
            .protocols(K8S_PROTOCOLS)
            .on_upgrade(move |socket| bridge(socket, backend)),
        Err(e) => {
            warn!(endpoint = %endpoint_id, error = %e, "Exec backend unavailable");
            ws.protocols(K8S_PROTOCOLS).on_upgrade(|socket| async move {
                let (mut sender, _) = socket.split();
                send_k8s_error_and_close(&mut sender, "failed to reach environment").await;
            })
        }
    };
    Ok(response.into_response())
}

/// List the environment's nodes
pub async fn nodes_handler(
    State(state): State<AppState>,
    Path(params): Path<NodesPath>,
    headers: HeaderMap,
) -> Result<Json<Vec<NodeInfo>>> {
    let identity = authenticate(&state.services.jwt, extract_bearer_token(&headers))?;
    let endpoint = load_endpoint(&state, EndpointId(params.endpoint_id))?;
    authorize_nodes(&state.services.authz, &identity, &endpoint)?;

    let backend = state.services.backends.backend_for(&endpoint).await?;
    Ok(Json(backend.get_nodes().await?))
}

//! Gateway server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::error::Error;
use crate::proxy::{exec_handler, nodes_handler, proxy_handler};
use crate::transport::{GatewayServices, TransportFactory};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM file; TLS is served when both paths are set
    pub tls_cert_path: Option<PathBuf>,
    /// TLS private key PEM file
    pub tls_key_path: Option<PathBuf>,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Store, identity, authorization and credential services
    pub services: GatewayServices,
    /// Per-environment transports
    pub transports: Arc<TransportFactory>,
}

impl AppState {
    /// State over a transport factory
    pub fn new(transports: Arc<TransportFactory>) -> Self {
        Self {
            services: transports.services().clone(),
            transports,
        }
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/api/endpoints/{endpoint_id}/kubernetes/nodes",
            get(nodes_handler),
        )
        // Exec - WebSocket upgrade route (must be before generic proxy)
        .route(
            "/api/endpoints/{endpoint_id}/kubernetes/api/v1/namespaces/{namespace}/pods/{pod}/exec",
            any(exec_handler),
        )
        .route("/api/endpoints/{endpoint_id}/kubernetes", any(proxy_handler))
        .route(
            "/api/endpoints/{endpoint_id}/kubernetes/{*path}",
            any(proxy_handler),
        )
        .with_state(state)
}

/// Start the gateway
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<(), Error> {
    let app = router(state);

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::Config(format!("TLS config error: {}", e)))?;

            info!(addr = %config.addr, "Starting gateway (TLS)");
            axum_server::bind_rustls(config.addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;
        }
        (None, None) => {
            let listener = tokio::net::TcpListener::bind(config.addr)
                .await
                .map_err(|e| Error::Config(format!("failed to bind {}: {}", config.addr, e)))?;

            info!(addr = %config.addr, "Starting gateway");
            axum::serve(listener, app)
                .await
                .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;
        }
        _ => {
            return Err(Error::Config(
                "tls_cert_path and tls_key_path must be set together".into(),
            ))
        }
    }

    Ok(())
}

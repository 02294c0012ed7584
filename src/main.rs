//! Warden - access-control gateway for multi-tenant Kubernetes environments

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use warden_authz::roles::create_or_update_predefined_roles;
use warden_authz::{AuthEvents, AuthorizationService};
use warden_common::identity::JwtService;
use warden_common::store::{MemoryStore, StoreSnapshot};
use warden_common::telemetry::{init_tracing, TelemetryConfig};
use warden_kube::KubeBackendFactory;
use warden_proxy::{
    start_server, AppState, GatewayServices, ServerConfig, SignatureService, TracingAuditLogger,
    TransportFactory, TunnelService,
};
use warden_token::{load_admin_token, FileTokenReader, TokenCache, TokenManager};

use crate::config::{Cli, GatewayConfig};

/// How often stale edge tunnels are demoted
const TUNNEL_REAP_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let config = GatewayConfig::load(&cli)?;

    init_tracing(&TelemetryConfig {
        format: config.log_format,
        ..Default::default()
    })?;

    run(config).await
}

fn load_store(config: &GatewayConfig) -> anyhow::Result<MemoryStore> {
    let Some(path) = &config.store_path else {
        info!("No store snapshot configured, starting empty");
        return Ok(MemoryStore::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read store snapshot {}", path.display()))?;
    let snapshot: StoreSnapshot = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse store snapshot {}", path.display()))?;
    info!(
        users = snapshot.users.len(),
        endpoints = snapshot.endpoints.len(),
        "Loaded store snapshot"
    );
    Ok(MemoryStore::from_snapshot(snapshot))
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let store = Arc::new(load_store(&config)?);
    create_or_update_predefined_roles(store.as_ref())?;

    let token_validity = Duration::from_secs(config.token_validity_secs);
    let jwt = Arc::new(JwtService::new(config.jwt_secret.as_bytes(), token_validity));
    // Gateway clients are rebuilt well before their internal token expires
    let backends = Arc::new(KubeBackendFactory::new(
        jwt.clone(),
        config.internal_url.clone(),
        token_validity / 2,
    ));

    let token_cache = Arc::new(TokenCache::new());
    let mut events = AuthEvents::new();
    events.register_event_handler("token-cache", token_cache.clone());
    let authz = Arc::new(AuthorizationService::new(
        store.clone(),
        backends.clone(),
        events,
    ));

    let admin_token = load_admin_token(
        &FileTokenReader::new(&config.admin_token_path),
        config.use_admin_token,
    )
    .await?;
    let tokens = Arc::new(TokenManager::new(authz.clone(), token_cache, admin_token));

    let signer = match &config.signature_key_path {
        Some(path) => SignatureService::from_file(path)?,
        None => SignatureService::generate()?,
    };
    info!(public_key = %signer.public_key(), "Agent signature key ready");

    let tunnels = Arc::new(TunnelService::new(Duration::from_secs(
        config.tunnel_keepalive_secs,
    )));
    let _reaper = tunnels.spawn_reaper(TUNNEL_REAP_INTERVAL);

    let services = GatewayServices {
        store,
        jwt,
        authz,
        tokens,
        backends,
        audit: Arc::new(TracingAuditLogger),
    };
    let transports = Arc::new(TransportFactory::new(services, Arc::new(signer), tunnels));

    start_server(
        ServerConfig {
            addr: config.listen_addr,
            tls_cert_path: config.tls_cert_path,
            tls_key_path: config.tls_key_path,
        },
        AppState::new(transports),
    )
    .await?;

    Ok(())
}

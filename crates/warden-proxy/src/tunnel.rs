//! Reverse tunnels opened by edge agents
//!
//! An edge agent dials in and the tunnel server exposes its Kubernetes API
//! on a local port. This registry maps environments to those ports and tracks
//! whether each tunnel is in use: a successful round trip marks it active
//! and re-arms its keep-alive deadline, a failure or an expired deadline
//! marks it idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use warden_common::model::EndpointId;

/// Tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    /// Open but unused since the keep-alive deadline, or last use failed
    Idle,
    /// Used successfully within the keep-alive window
    Active,
}

/// One environment's tunnel
#[derive(Debug, Clone, Copy)]
pub struct TunnelDetails {
    /// Local port the agent's API is exposed on
    pub port: u16,
    /// Current state
    pub status: TunnelStatus,
    /// Last successful round trip
    pub last_activity: Instant,
}

/// Registry of edge tunnels
pub struct TunnelService {
    tunnels: DashMap<EndpointId, TunnelDetails>,
    keepalive: Duration,
}

impl TunnelService {
    /// Create an empty registry
    pub fn new(keepalive: Duration) -> Self {
        Self {
            tunnels: DashMap::new(),
            keepalive,
        }
    }

    /// Record a tunnel opened by an agent
    pub fn register(&self, endpoint_id: EndpointId, port: u16) {
        self.tunnels.insert(
            endpoint_id,
            TunnelDetails {
                port,
                status: TunnelStatus::Idle,
                last_activity: Instant::now(),
            },
        );
        info!(endpoint = %endpoint_id, port, "Tunnel registered");
    }

    /// Forget a tunnel
    pub fn remove(&self, endpoint_id: EndpointId) {
        if self.tunnels.remove(&endpoint_id).is_some() {
            info!(endpoint = %endpoint_id, "Tunnel removed");
        }
    }

    /// Current details of a tunnel
    pub fn get(&self, endpoint_id: EndpointId) -> Option<TunnelDetails> {
        self.tunnels.get(&endpoint_id).map(|t| *t)
    }

    /// Mark a tunnel active and re-arm its keep-alive deadline
    pub fn set_active(&self, endpoint_id: EndpointId) {
        if let Some(mut tunnel) = self.tunnels.get_mut(&endpoint_id) {
            tunnel.status = TunnelStatus::Active;
            tunnel.last_activity = Instant::now();
        }
    }

    /// Mark a tunnel idle
    pub fn set_idle(&self, endpoint_id: EndpointId) {
        if let Some(mut tunnel) = self.tunnels.get_mut(&endpoint_id) {
            if tunnel.status != TunnelStatus::Idle {
                debug!(endpoint = %endpoint_id, "Tunnel idle");
            }
            tunnel.status = TunnelStatus::Idle;
        }
    }

    /// Demote active tunnels whose keep-alive deadline has passed
    ///
    /// Returns the demoted environments.
    pub fn expire_idle(&self) -> Vec<EndpointId> {
        let mut expired = Vec::new();
        for mut tunnel in self.tunnels.iter_mut() {
            if tunnel.status == TunnelStatus::Active
                && tunnel.last_activity.elapsed() >= self.keepalive
            {
                tunnel.status = TunnelStatus::Idle;
                expired.push(*tunnel.key());
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired idle tunnels");
        }
        expired
    }

    /// Run [`expire_idle`](Self::expire_idle) every `interval`
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tunnels = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                tunnels.expire_idle();
            }
        })
    }
}

//! Authorization change fan-out
//!
//! Subsystems that cache anything derived from access policies (the token
//! cache, chiefly) subscribe here. The handler list is assembled once while
//! the process is wired together and is immutable afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use warden_common::model::{EndpointId, UserId};

/// Receiver of authorization change events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthEventHandler: Send + Sync {
    /// Policies of one environment changed
    async fn handle_endpoint_auth_update(&self, endpoint_id: EndpointId);

    /// Policies changed in a way that may affect every user
    async fn handle_users_auth_update(&self);

    /// One user's access changed or the user was removed
    async fn handle_user_auth_delete(&self, user_id: UserId);
}

/// Registry of event handlers
#[derive(Clone, Default)]
pub struct AuthEvents {
    handlers: Vec<(String, Arc<dyn AuthEventHandler>)>,
}

impl AuthEvents {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler under a name
    ///
    /// Registering the same name twice replaces the earlier handler.
    pub fn register_event_handler(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn AuthEventHandler>,
    ) {
        let name = name.into();
        self.handlers.retain(|(existing, _)| *existing != name);
        self.handlers.push((name, handler));
    }

    /// Number of subscribed handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is subscribed
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Notify that one environment's policies changed
    pub async fn trigger_endpoint_auth_update(&self, endpoint_id: EndpointId) {
        for (name, handler) in &self.handlers {
            debug!(handler = %name, endpoint = %endpoint_id, "Dispatching endpoint auth update");
            handler.handle_endpoint_auth_update(endpoint_id).await;
        }
    }

    /// Notify that every user's access may have changed
    pub async fn trigger_users_auth_update(&self) {
        for (name, handler) in &self.handlers {
            debug!(handler = %name, "Dispatching users auth update");
            handler.handle_users_auth_update().await;
        }
    }

    /// Notify that one user's access changed
    pub async fn trigger_user_auth_update(&self, user_id: UserId) {
        for (name, handler) in &self.handlers {
            debug!(handler = %name, user = %user_id, "Dispatching user auth update");
            handler.handle_user_auth_delete(user_id).await;
        }
    }
}

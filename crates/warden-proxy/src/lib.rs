//! Warden Kubernetes Gateway
//!
//! Forwards Kubernetes API traffic from platform users to each environment
//! with a per-user backend credential instead of the caller's platform
//! token. Namespace-scoped operations are checked against the platform's
//! own authorizations before anything is forwarded, and successful writes
//! are audited with secrets redacted.
//!
//! # Architecture
//!
//! ```text
//! client ──► Gateway ──► guards ──► Transport ──► K8s API (local)
//!          (JWT)       (authz)     (credential) └► agent (signed)
//!                                               └► edge agent (tunnel)
//! ```
//!
//! # Endpoints
//!
//! - `* /api/endpoints/{id}/kubernetes/*` - Proxy to the environment's K8s API
//! - `GET /api/endpoints/{id}/kubernetes/api/v1/namespaces/{ns}/pods/{pod}/exec` -
//!   Exec over WebSocket
//! - `GET /api/endpoints/{id}/kubernetes/nodes` - Node listing
//! - `GET /healthz` - Health check

#![deny(missing_docs)]

pub mod audit;
pub mod auth;
pub mod error;
pub mod exec_proxy;
pub mod forwarder;
pub mod guard;
pub mod proxy;
pub mod redact;
pub mod routing;
pub mod server;
pub mod signature;
pub mod transport;
pub mod tunnel;

pub use audit::{AuditLogger, AuditRecord, TracingAuditLogger};
pub use error::{Error, Result};
pub use server::{router, start_server, AppState, ServerConfig};
pub use signature::SignatureService;
pub use transport::{GatewayServices, Transport, TransportFactory};
pub use tunnel::{TunnelService, TunnelStatus};

#[cfg(test)]
mod testing {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use warden_authz::roles::{
        create_or_update_predefined_roles, ROLE_OPERATOR, ROLE_READONLY, ROLE_STANDARD_USER,
    };
    use warden_authz::{AuthEvents, AuthorizationService};
    use warden_common::identity::{JwtService, TokenData};
    use warden_common::model::{
        AccessPolicy, Endpoint, EndpointGroup, EndpointGroupId, EndpointId, EndpointType,
        KubernetesConfiguration, NamespaceAccessPolicy, User, UserId, UserRole,
    };
    use warden_common::store::{MemoryStore, PolicyStore};
    use warden_common::testing::{InMemoryBackend, StaticBackendFactory};
    use warden_token::{TokenCache, TokenManager};
    use zeroize::Zeroizing;

    use crate::audit::{AuditLogger, TracingAuditLogger};
    use crate::transport::GatewayServices;

    /// Environment 1 with three namespaces. Users: 1 admin, 7 standard
    /// (write on team-a), 8 readonly (read on team-a), 9 without a role,
    /// 10 operator.
    pub struct Fixture {
        pub store: Arc<MemoryStore>,
        pub backend: Arc<InMemoryBackend>,
        pub authz: Arc<AuthorizationService>,
        pub jwt: Arc<JwtService>,
        pub services: GatewayServices,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_audit(Arc::new(TracingAuditLogger))
        }

        pub fn with_audit(audit: Arc<dyn AuditLogger>) -> Self {
            let store = Arc::new(MemoryStore::new());
            create_or_update_predefined_roles(store.as_ref()).unwrap();

            store.put_endpoint_group(EndpointGroup {
                id: EndpointGroupId(1),
                name: "group-1".into(),
                user_access_policies: Default::default(),
                team_access_policies: Default::default(),
            });
            store.put_endpoint(Endpoint {
                id: EndpointId(1),
                name: "env-1".into(),
                group_id: EndpointGroupId(1),
                endpoint_type: EndpointType::KubernetesLocal,
                url: "https://kubernetes.default.svc".into(),
                tls_config: Default::default(),
                user_access_policies: BTreeMap::from([
                    (UserId(7), AccessPolicy::new(ROLE_STANDARD_USER)),
                    (UserId(8), AccessPolicy::new(ROLE_READONLY)),
                    (UserId(10), AccessPolicy::new(ROLE_OPERATOR)),
                ]),
                team_access_policies: Default::default(),
                kubernetes: KubernetesConfiguration {
                    restrict_default_namespace: true,
                    ..Default::default()
                },
                security_settings: Default::default(),
            });

            store.put_user(User {
                id: UserId(1),
                username: "user-1".into(),
                role: UserRole::Administrator,
                endpoint_authorizations: Default::default(),
            });
            for id in [7, 8, 9, 10] {
                store.put_user(User {
                    id: UserId(id),
                    username: format!("user-{}", id),
                    role: UserRole::Standard,
                    endpoint_authorizations: Default::default(),
                });
            }

            let backend = Arc::new(InMemoryBackend::with_namespaces(&[
                "default", "team-a", "team-b",
            ]));
            backend.seed_policies(BTreeMap::from([(
                "team-a".to_string(),
                NamespaceAccessPolicy {
                    user_access_policies: BTreeMap::from([
                        (UserId(7), AccessPolicy::new(ROLE_STANDARD_USER)),
                        (UserId(8), AccessPolicy::new(ROLE_READONLY)),
                    ]),
                    team_access_policies: Default::default(),
                },
            )]));

            let backends = Arc::new(StaticBackendFactory::new(backend.clone()));
            let authz = Arc::new(AuthorizationService::new(
                store.clone(),
                backends.clone(),
                AuthEvents::new(),
            ));
            let tokens = Arc::new(TokenManager::new(
                authz.clone(),
                Arc::new(TokenCache::new()),
                Some(Zeroizing::new("admin-token".to_string())),
            ));
            let jwt = Arc::new(JwtService::new(b"gateway-test-secret", Duration::from_secs(300)));

            let services = GatewayServices {
                store: store.clone(),
                jwt: jwt.clone(),
                authz: authz.clone(),
                tokens,
                backends,
                audit,
            };

            Self {
                store,
                backend,
                authz,
                jwt,
                services,
            }
        }

        pub fn endpoint(&self) -> Endpoint {
            self.store.endpoint(EndpointId(1)).unwrap()
        }

        pub fn bearer(&self, user: u32, role: UserRole) -> String {
            self.jwt.issue(&identity(user, role)).unwrap()
        }
    }

    pub fn identity(id: u32, role: UserRole) -> TokenData {
        TokenData {
            id: UserId(id),
            username: format!("user-{}", id),
            role,
        }
    }
}

//! Two-level token cache
//!
//! Outer level: environment id to a per-environment cache, in a `DashMap` so
//! lookups for different environments never contend and creation is atomic.
//! Inner level: user id to token behind one async mutex per environment. The
//! mutex is held while a missing token is provisioned, so at most one
//! provisioning runs per environment at a time and a user is never
//! provisioned twice for the same miss.
//!
//! Entries have no time-to-live; they are dropped by the auth events.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use warden_authz::AuthEventHandler;
use warden_common::model::{EndpointId, UserId};
use warden_common::Result;

/// Tokens of one environment
#[derive(Default)]
pub struct UserTokenCache {
    tokens: Mutex<HashMap<UserId, String>>,
}

impl UserTokenCache {
    /// Return the cached token or compute, cache and return a new one
    ///
    /// `compute` runs with the environment lock held. Failures are returned
    /// and nothing is cached.
    pub async fn get_or_add<F, Fut>(&self, user_id: UserId, compute: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(&user_id) {
            return Ok(token.clone());
        }

        let token = compute().await?;
        tokens.insert(user_id, token.clone());
        debug!(user = %user_id, "Cached service account token");
        Ok(token)
    }

    /// Drop one user's token
    pub async fn remove(&self, user_id: UserId) {
        self.tokens.lock().await.remove(&user_id);
    }

    /// Drop every token
    pub async fn clear(&self) {
        self.tokens.lock().await.clear();
    }

    /// Number of cached tokens
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Whether no token is cached
    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }
}

/// Environment id to per-environment token cache
#[derive(Default)]
pub struct TokenCache {
    environments: DashMap<EndpointId, Arc<UserTokenCache>>,
}

impl TokenCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The environment's cache, created on first access
    ///
    /// Concurrent callers for the same environment get the same instance.
    pub fn get_or_create(&self, endpoint_id: EndpointId) -> Arc<UserTokenCache> {
        self.environments.entry(endpoint_id).or_default().clone()
    }

    /// Forget an environment entirely
    pub fn remove(&self, endpoint_id: EndpointId) {
        self.environments.remove(&endpoint_id);
    }

    // Clones the Arcs out so no shard lock is held across an await.
    fn all(&self) -> Vec<Arc<UserTokenCache>> {
        self.environments
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl AuthEventHandler for TokenCache {
    async fn handle_endpoint_auth_update(&self, endpoint_id: EndpointId) {
        let inner = self
            .environments
            .get(&endpoint_id)
            .map(|entry| entry.value().clone());
        if let Some(inner) = inner {
            inner.clear().await;
            debug!(endpoint = %endpoint_id, "Cleared environment tokens");
        }
    }

    async fn handle_users_auth_update(&self) {
        for inner in self.all() {
            inner.clear().await;
        }
        debug!("Cleared all tokens");
    }

    async fn handle_user_auth_delete(&self, user_id: UserId) {
        for inner in self.all() {
            inner.remove(user_id).await;
        }
        debug!(user = %user_id, "Cleared user tokens");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use warden_common::Error;

    async fn must_not_run() -> Result<String> {
        panic!("compute must not run after a hit");
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_returns_same_instance() {
        let cache = Arc::new(TokenCache::new());

        let a = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_create(EndpointId(1)) })
        };
        let b = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_create(EndpointId(1)) })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &cache.get_or_create(EndpointId(1))));
        assert!(!Arc::ptr_eq(&a, &cache.get_or_create(EndpointId(2))));
    }

    #[tokio::test]
    async fn test_hit_does_not_recompute() {
        let inner = UserTokenCache::default();

        let token = inner
            .get_or_add(UserId(1), || async { Ok("t1".to_string()) })
            .await
            .unwrap();
        assert_eq!(token, "t1");

        let token = inner.get_or_add(UserId(1), must_not_run).await.unwrap();
        assert_eq!(token, "t1");
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let inner = UserTokenCache::default();

        let err = inner
            .get_or_add(UserId(1), || async { Err(Error::upstream("down")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
        assert!(inner.is_empty().await);

        let token = inner
            .get_or_add(UserId(1), || async { Ok("t1".to_string()) })
            .await
            .unwrap();
        assert_eq!(token, "t1");
    }

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        let inner = Arc::new(UserTokenCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let inner = inner.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                inner
                    .get_or_add(UserId(1), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok("t1".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "t1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_user_delete_clears_only_that_user() {
        let cache = TokenCache::new();
        for env in [1, 2] {
            let inner = cache.get_or_create(EndpointId(env));
            for user in [1, 2] {
                inner
                    .get_or_add(UserId(user), || async move { Ok(format!("t{}", user)) })
                    .await
                    .unwrap();
            }
        }

        cache.handle_user_auth_delete(UserId(1)).await;

        for env in [1, 2] {
            let inner = cache.get_or_create(EndpointId(env));
            assert_eq!(inner.len().await, 1);
            let token = inner
                .get_or_add(UserId(2), must_not_run)
                .await
                .unwrap();
            assert_eq!(token, "t2");
        }
    }

    #[tokio::test]
    async fn test_endpoint_update_clears_one_environment() {
        let cache = TokenCache::new();
        for env in [1, 2] {
            cache
                .get_or_create(EndpointId(env))
                .get_or_add(UserId(1), || async { Ok("t".to_string()) })
                .await
                .unwrap();
        }

        cache.handle_endpoint_auth_update(EndpointId(1)).await;

        assert!(cache.get_or_create(EndpointId(1)).is_empty().await);
        assert_eq!(cache.get_or_create(EndpointId(2)).len().await, 1);
    }

    #[tokio::test]
    async fn test_endpoint_update_for_unknown_environment_is_noop() {
        let cache = TokenCache::new();
        cache.handle_endpoint_auth_update(EndpointId(42)).await;
        assert!(cache.environments.is_empty());
    }

    #[tokio::test]
    async fn test_users_update_clears_everything() {
        let cache = TokenCache::new();
        for env in [1, 2] {
            cache
                .get_or_create(EndpointId(env))
                .get_or_add(UserId(env), || async { Ok("t".to_string()) })
                .await
                .unwrap();
        }

        cache.handle_users_auth_update().await;

        for env in [1, 2] {
            assert!(cache.get_or_create(EndpointId(env)).is_empty().await);
        }
    }
}

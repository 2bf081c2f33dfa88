//! Per-feed token cache with single-flight renewal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use tracing::{debug, info};

use crate::adapter::{Adapter, Credentials};
use crate::error::Result;
use crate::model::TupleId;

/// Lease assumed for tokens that carry no readable `exp` claim.
pub const DEFAULT_LEASE_SECS: i64 = 55 * 60;

/// Tokens are scoped to one (operator, feed kind, feed index) tuple.
pub type TokenKey = TupleId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub token: String,
    /// Epoch seconds.
    pub expires_at: i64,
}

impl TokenEntry {
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
pub struct TokenManager {
    entries: Mutex<HashMap<TokenKey, TokenEntry>>,
    renewals: Mutex<HashMap<TokenKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token for `key`, if it has not expired yet.
    pub fn get_token(&self, key: &TokenKey) -> Option<String> {
        let now = Utc::now().timestamp();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.token.clone())
    }

    pub fn set_token(&self, key: TokenKey, token: String, expires_at: i64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, TokenEntry { token, expires_at });
    }

    /// Returns the cached token or logs in through `adapter`.
    ///
    /// Concurrent callers for the same key wait for the first caller's login
    /// and reuse its token instead of logging in again.
    pub async fn login(&self, key: &TokenKey, adapter: &dyn Adapter, credentials: &Credentials) -> Result<String> {
        if let Some(token) = self.get_token(key) {
            debug!(tuple = %key, "Token reused from cache");
            return Ok(token);
        }

        let renewal = self.renewal_lock(key);
        let _guard = renewal.lock().await;

        // someone else may have renewed while we waited
        if let Some(token) = self.get_token(key) {
            return Ok(token);
        }

        let token = adapter.login(credentials).await?;
        let expires_at = jwt_expiry(&token).unwrap_or_else(|| Utc::now().timestamp() + DEFAULT_LEASE_SECS);
        self.set_token(key.clone(), token.clone(), expires_at);
        info!(tuple = %key, adapter = adapter.id(), expires_at, "Token renewed");
        Ok(token)
    }

    /// Drops the cached token after the feed endpoint rejected it. A token
    /// renewed by another caller in the meantime is kept.
    pub fn invalidate(&self, key: &TokenKey, rejected: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| entry.token == rejected) {
            entries.remove(key);
            info!(tuple = %key, "Token invalidated");
        }
    }

    fn renewal_lock(&self, key: &TokenKey) -> Arc<tokio::sync::Mutex<()>> {
        self.renewals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }
}

/// Reads the `exp` claim of a JWT without verifying its signature.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, claims, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    let decoded = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|v| v as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollerError;
    use crate::model::FeedKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_get_token_respects_expiry() {
        let manager = TokenManager::new();
        let now = Utc::now().timestamp();

        manager.set_token(key(0), "fresh".to_string(), now + 60);
        manager.set_token(key(1), "stale".to_string(), now - 1);

        assert_eq!(manager.get_token(&key(0)).as_deref(), Some("fresh"));
        assert_eq!(manager.get_token(&key(1)), None);
        assert_eq!(manager.get_token(&key(2)), None);
    }

    #[tokio::test]
    async fn test_login_caches_token() {
        let manager = TokenManager::new();
        let adapter = CountingAdapter::new("opaque-token");

        let first = manager.login(&key(0), &adapter, &credentials()).await.unwrap();
        let second = manager.login(&key(0), &adapter, &credentials()).await.unwrap();

        assert_eq!(first, "opaque-token");
        assert_eq!(second, "opaque-token");
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_login() {
        let manager = TokenManager::new();
        let adapter = CountingAdapter::new("new");
        manager.set_token(key(0), "old".to_string(), Utc::now().timestamp() - 10);

        let token = manager.login(&key(0), &adapter, &credentials()).await.unwrap();

        assert_eq!(token, "new");
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_opaque_token_gets_default_lease() {
        let manager = TokenManager::new();
        let before = Utc::now().timestamp();

        manager
            .login(&key(0), &CountingAdapter::new("opaque"), &credentials())
            .await
            .unwrap();

        let expires_at = manager.entries.lock().unwrap()[&key(0)].expires_at;
        assert!(expires_at >= before + DEFAULT_LEASE_SECS);
        assert!(expires_at <= Utc::now().timestamp() + DEFAULT_LEASE_SECS);
    }

    #[tokio::test]
    async fn test_jwt_exp_used_as_expiry() {
        let manager = TokenManager::new();
        let token = jwt(r#"{"sub":"poller","exp":4102444800}"#);

        manager
            .login(&key(0), &CountingAdapter::new(&token), &credentials())
            .await
            .unwrap();

        assert_eq!(manager.entries.lock().unwrap()[&key(0)].expires_at, 4_102_444_800);
    }

    #[tokio::test]
    async fn test_concurrent_logins_are_single_flight() {
        let manager = Arc::new(TokenManager::new());
        let adapter = Arc::new(CountingAdapter::new("shared").with_delay(Duration::from_millis(50)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let adapter = adapter.clone();
            handles.push(tokio::spawn(async move {
                manager.login(&key(0), adapter.as_ref(), &credentials()).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }

        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let manager = TokenManager::new();
        let adapter = CountingAdapter::new("t");

        manager.login(&key(0), &adapter, &credentials()).await.unwrap();
        manager.login(&key(1), &adapter, &credentials()).await.unwrap();

        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_login_failure_is_not_cached() {
        let manager = TokenManager::new();
        let adapter = CountingAdapter::failing();

        let err = manager.login(&key(0), &adapter, &credentials()).await.unwrap_err();

        assert!(matches!(err, PollerError::Auth(_)));
        assert_eq!(manager.get_token(&key(0)), None);
    }

    #[test]
    fn test_invalidate_only_rejected_token() {
        let manager = TokenManager::new();
        let exp = Utc::now().timestamp() + 600;
        manager.set_token(key(0), "current".to_string(), exp);

        manager.invalidate(&key(0), "older");
        assert_eq!(manager.get_token(&key(0)).as_deref(), Some("current"));

        manager.invalidate(&key(0), "current");
        assert_eq!(manager.get_token(&key(0)), None);
    }

    #[test]
    fn test_jwt_expiry_parsing() {
        assert_eq!(jwt_expiry(&jwt(r#"{"exp":1700000000}"#)), Some(1_700_000_000));
        assert_eq!(jwt_expiry(&jwt(r#"{"sub":"x"}"#)), None);
        assert_eq!(jwt_expiry("not-a-jwt"), None);
        assert_eq!(jwt_expiry("a.!!!.c"), None);
    }

    // Helper functions for tests
    struct CountingAdapter {
        token: Option<String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CountingAdapter {
        fn new(token: &str) -> Self {
            Self {
                token: Some(token.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                token: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Adapter for CountingAdapter {
        fn id(&self) -> &str {
            "counting"
        }

        async fn login(&self, _credentials: &Credentials) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.token
                .clone()
                .ok_or_else(|| PollerError::Auth("bad credentials".to_string()))
        }
    }

    fn key(index: usize) -> TokenKey {
        TupleId::new("op", FeedKind::Avl, index)
    }

    fn credentials() -> Credentials {
        Credentials::Basic {
            username: "u".to_string(),
            password: "p".to_string(),
        }
    }

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }
}

//! Access token sources.

use crate::lock;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Supplies the bearer token presented to the hub.
///
/// Called once per connection attempt, so a refreshed token is picked up on
/// reconnect. Empty strings are treated as missing.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn auth_token(&self) -> Option<String>;
}

/// Fetch a non-empty token from `provider`.
pub(crate) async fn fetch_token(provider: &dyn TokenProvider) -> Option<String> {
    provider.auth_token().await.filter(|t| !t.is_empty())
}

/// Hands out a token that was already fetched, then defers to `inner`.
///
/// Lets the first connect reuse the token checked during initialisation
/// instead of asking the provider twice.
pub(crate) struct PrimedToken {
    primed: Mutex<Option<String>>,
    inner: Arc<dyn TokenProvider>,
}

impl PrimedToken {
    pub fn new(token: String, inner: Arc<dyn TokenProvider>) -> Self {
        Self {
            primed: Mutex::new(Some(token)),
            inner,
        }
    }
}

#[async_trait]
impl TokenProvider for PrimedToken {
    async fn auth_token(&self) -> Option<String> {
        let primed = lock(&self.primed).take();
        match primed {
            Some(token) => Some(token),
            None => self.inner.auth_token().await,
        }
    }
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn auth_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn auth_token(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

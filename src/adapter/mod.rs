//! Per-operator feed adapters and the registry that resolves them.
//!
//! An [`Adapter`] knows how to log in to an operator's endpoints and turn
//! their payloads into [`Candidate`]s. Every capability defaults to
//! [`PollerError::NotImplemented`], so an adapter only overrides the feed
//! kinds it actually supports.

mod busitalia;
mod generic;

pub use busitalia::BusitaliaAdapter;
pub use generic::GenericAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::config::{AvlFeedConfig, AvlLoginConfig, FeedConfig, GtfsRtFeedConfig, OperatorConfig, SiriFeedConfig};
use crate::error::{PollerError, Result};
use crate::fetch::auth::{Authorization, build_headers};
use crate::fetch::{HttpClient, send_json};
use crate::model::{Candidate, FeedPayload, GtfsRtBatch};

/// Identifier the registry falls back to when an operator names no adapter.
pub const GENERIC_ADAPTER_ID: &str = "generic";

/// What an adapter needs to obtain a token for one feed.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Login endpoint of a proprietary AVL system.
    Avl(AvlLoginConfig),
    /// HTTP basic credentials, encoded locally into the token.
    Basic { username: String, password: String },
}

impl Credentials {
    /// Credentials required by `feed`, or `None` when it is polled anonymously.
    pub fn for_feed(feed: &FeedConfig) -> Option<Self> {
        match feed {
            FeedConfig::Avl(f) => Some(Credentials::Avl(f.login.clone())),
            FeedConfig::GtfsRt(f) => match (&f.username, &f.password) {
                (Some(username), Some(password)) => Some(Credentials::Basic {
                    username: username.clone(),
                    password: password.clone(),
                }),
                _ => None,
            },
            FeedConfig::Siri(_) => None,
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn id(&self) -> &str;

    async fn login(&self, _credentials: &Credentials) -> Result<String> {
        Err(PollerError::NotImplemented(format!("{}: login", self.id())))
    }

    async fn fetch_vehicles(&self, _token: &str, _feed: &AvlFeedConfig) -> Result<Vec<Candidate>> {
        Err(PollerError::NotImplemented(format!("{}: AVL feed", self.id())))
    }

    async fn fetch_vehicles_gtfsrt(
        &self,
        _token: Option<&str>,
        _feed: &GtfsRtFeedConfig,
    ) -> Result<GtfsRtBatch> {
        Err(PollerError::NotImplemented(format!("{}: GTFS-RT feed", self.id())))
    }

    async fn fetch_vehicles_siri(&self, _feed: &SiriFeedConfig) -> Result<Vec<Candidate>> {
        Err(PollerError::NotImplemented(format!("{}: SIRI feed", self.id())))
    }
}

/// Calls the capability matching the feed kind.
///
/// AVL feeds are always login-protected, so a missing token is an
/// [`PollerError::Auth`] error rather than an anonymous request.
pub async fn fetch_feed(adapter: &dyn Adapter, token: Option<&str>, feed: &FeedConfig) -> Result<FeedPayload> {
    match feed {
        FeedConfig::Avl(f) => {
            let token = token.ok_or_else(|| PollerError::Auth("AVL feed polled without a token".to_string()))?;
            Ok(FeedPayload::Avl(adapter.fetch_vehicles(token, f).await?))
        }
        FeedConfig::GtfsRt(f) => Ok(FeedPayload::GtfsRt(adapter.fetch_vehicles_gtfsrt(token, f).await?)),
        FeedConfig::Siri(f) => Ok(FeedPayload::Siri(adapter.fetch_vehicles_siri(f).await?)),
    }
}

/// Startup-time map from adapter identifier to implementation.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    fallback: Arc<dyn Adapter>,
}

impl AdapterRegistry {
    pub fn new(fallback: Arc<dyn Adapter>) -> Self {
        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert(fallback.id().to_string(), fallback.clone());
        Self { adapters, fallback }
    }

    /// Registry holding every adapter shipped with the crate, all sharing `http`.
    pub fn with_builtin(http: Arc<dyn HttpClient>) -> Self {
        let mut registry = Self::new(Arc::new(GenericAdapter::new(http.clone())));
        registry.register(Arc::new(BusitaliaAdapter::new(http)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Adapter named by the operator, or the generic one when it names none.
    ///
    /// # Errors
    ///
    /// [`PollerError::Config`] if the operator names an unregistered adapter.
    pub fn resolve(&self, operator: &OperatorConfig) -> Result<Arc<dyn Adapter>> {
        match operator.adapter_id() {
            None => Ok(self.fallback.clone()),
            Some(id) => self.adapters.get(id).cloned().ok_or_else(|| {
                PollerError::Config(format!("operator '{}': unknown adapter '{id}'", operator.slug))
            }),
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Logs in to an AVL endpoint: the credentials plus any configured extra
/// parameters are sent as a JSON body, and the token is read from `token`
/// or `access_token` in the reply.
pub(crate) async fn avl_login(http: &dyn HttpClient, login: &AvlLoginConfig) -> Result<String> {
    let (Some(username), Some(password)) = (login.resolved_username(), login.resolved_password()) else {
        return Err(PollerError::Config(format!(
            "no AVL credentials for {} (set username/password or AVL_USERNAME/AVL_PASSWORD)",
            login.url
        )));
    };

    let mut body = serde_json::Map::new();
    body.insert("username".to_string(), Value::String(username));
    body.insert("password".to_string(), Value::String(password));
    for (name, value) in &login.extra_params {
        body.insert(name.clone(), value.clone());
    }

    let method = Method::from_bytes(login.method.to_ascii_uppercase().as_bytes())
        .map_err(|e| PollerError::Config(format!("invalid login method '{}': {e}", login.method)))?;
    let headers = build_headers(&login.headers, Authorization::None)?;

    let reply = send_json(http, method, &login.url, headers, &Value::Object(body)).await?;
    token_from_reply(&reply)
}

fn token_from_reply(reply: &Value) -> Result<String> {
    reply
        .get("token")
        .or_else(|| reply.get("access_token"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PollerError::Auth("login response carries no token".to_string()))
}

//! Operator and feed configuration.
//!
//! Stored as a JSON document on disk:
//! ```json
//! {
//!   "default_polling_interval": 60,
//!   "operators": [
//!     {
//!       "slug": "busitalia_veneto_padua",
//!       "name": "Busitalia Veneto",
//!       "enable": true,
//!       "adapter": "busitalia_veneto_padua",
//!       "avl": [{ "enable": true, "login": { "url": "..." }, "vehicles": { "url": "..." } }],
//!       "gtfsrt": [{ "enable": true, "label": "urbano", "url": "..." }]
//!     }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::AdapterRegistry;
use crate::error::{PollerError, Result};
use crate::model::FeedKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Seconds between polls when neither the feed nor the operator overrides it.
    #[serde(default = "Config::default_polling_interval")]
    pub default_polling_interval: u64,
    /// Expiry of `vehicles:status` keys in the store.
    #[serde(default = "Config::default_vehicle_ttl_seconds")]
    pub vehicle_ttl_seconds: u64,
    /// Maximum length of each `vehicles:gtfsrt` snapshot list.
    #[serde(default = "Config::default_trip_history_len")]
    pub trip_history_len: usize,
    /// Cached data younger than this lets startup recovery skip a fetch.
    #[serde(default = "Config::default_recovery_max_age_minutes")]
    pub recovery_max_age_minutes: i64,
    #[serde(default = "Config::default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_attempts")]
    pub attempts: u32,
    #[serde(default = "RetryConfig::default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: Self::default_attempts(),
            delay_ms: Self::default_delay_ms(),
        }
    }
}

impl RetryConfig {
    fn default_attempts() -> u32 {
        3
    }
    fn default_delay_ms() -> u64 {
        1000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    /// Adapter identifier. Older configs name the operator module file instead.
    #[serde(default, alias = "filename")]
    pub adapter: Option<String>,
    #[serde(default)]
    pub avl: Vec<AvlFeedConfig>,
    #[serde(default)]
    pub gtfsrt: Vec<GtfsRtFeedConfig>,
    #[serde(default)]
    pub siri: Vec<SiriFeedConfig>,
    #[serde(default, rename = "pollingIntervalSeconds")]
    pub polling_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvlFeedConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "pollingIntervalSeconds")]
    pub polling_interval_seconds: Option<u64>,
    pub login: AvlLoginConfig,
    pub vehicles: AvlVehiclesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvlLoginConfig {
    pub url: String,
    #[serde(default = "AvlLoginConfig::default_method")]
    pub method: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Merged into the login body next to the credentials.
    #[serde(default, alias = "extraParams")]
    pub extra_params: serde_json::Map<String, serde_json::Value>,
}

impl AvlLoginConfig {
    fn default_method() -> String {
        "POST".to_string()
    }

    /// Username from config, falling back to `AVL_USERNAME`.
    pub fn resolved_username(&self) -> Option<String> {
        self.username
            .clone()
            .or_else(|| std::env::var("AVL_USERNAME").ok())
    }

    /// Password from config, falling back to `AVL_PASSWORD`.
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("AVL_PASSWORD").ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvlVehiclesConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GtfsRtFeedConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "pollingIntervalSeconds")]
    pub polling_interval_seconds: Option<u64>,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiriFeedConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "pollingIntervalSeconds")]
    pub polling_interval_seconds: Option<u64>,
    pub endpoint: String,
}

/// One feed of any kind, detached from its operator.
#[derive(Debug, Clone)]
pub enum FeedConfig {
    Avl(AvlFeedConfig),
    GtfsRt(GtfsRtFeedConfig),
    Siri(SiriFeedConfig),
}

impl FeedConfig {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedConfig::Avl(_) => FeedKind::Avl,
            FeedConfig::GtfsRt(_) => FeedKind::GtfsRt,
            FeedConfig::Siri(_) => FeedKind::Siri,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            FeedConfig::Avl(f) => f.enable,
            FeedConfig::GtfsRt(f) => f.enable,
            FeedConfig::Siri(f) => f.enable,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            FeedConfig::Avl(f) => f.label.as_deref(),
            FeedConfig::GtfsRt(f) => f.label.as_deref(),
            FeedConfig::Siri(f) => f.label.as_deref(),
        }
    }

    pub fn polling_interval_seconds(&self) -> Option<u64> {
        match self {
            FeedConfig::Avl(f) => f.polling_interval_seconds,
            FeedConfig::GtfsRt(f) => f.polling_interval_seconds,
            FeedConfig::Siri(f) => f.polling_interval_seconds,
        }
    }

    fn primary_url(&self) -> &str {
        match self {
            FeedConfig::Avl(f) => &f.vehicles.url,
            FeedConfig::GtfsRt(f) => &f.url,
            FeedConfig::Siri(f) => &f.endpoint,
        }
    }
}

impl OperatorConfig {
    /// Adapter identifier with any module file extension stripped.
    pub fn adapter_id(&self) -> Option<&str> {
        self.adapter
            .as_deref()
            .map(|a| a.rsplit_once('.').map_or(a, |(stem, _)| stem))
            .filter(|a| !a.is_empty())
    }

    /// All feeds of the operator as `(kind, index, feed)`, in declaration order.
    pub fn feeds(&self) -> Vec<(FeedKind, usize, FeedConfig)> {
        let avl = self
            .avl
            .iter()
            .enumerate()
            .map(|(i, f)| (FeedKind::Avl, i, FeedConfig::Avl(f.clone())));
        let gtfsrt = self
            .gtfsrt
            .iter()
            .enumerate()
            .map(|(i, f)| (FeedKind::GtfsRt, i, FeedConfig::GtfsRt(f.clone())));
        let siri = self
            .siri
            .iter()
            .enumerate()
            .map(|(i, f)| (FeedKind::Siri, i, FeedConfig::Siri(f.clone())));
        avl.chain(gtfsrt).chain(siri).collect()
    }

    /// Feeds that should be polled: the operator and the feed are both enabled.
    pub fn enabled_feeds(&self) -> Vec<(FeedKind, usize, FeedConfig)> {
        if !self.enable {
            return Vec::new();
        }
        self.feeds()
            .into_iter()
            .filter(|(_, _, feed)| feed.enabled())
            .collect()
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PollerError::Config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| PollerError::Config(format!("failed to parse config: {e}")))
    }

    /// Rejects configurations that could never poll successfully, so mistakes
    /// surface at load time rather than on every cycle.
    pub fn validate(&self, registry: &AdapterRegistry) -> Result<()> {
        if self.default_polling_interval == 0 {
            return Err(PollerError::Config(
                "default_polling_interval must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for op in &self.operators {
            if op.slug.trim().is_empty() {
                return Err(PollerError::Config("operator with empty slug".to_string()));
            }
            if !seen.insert(op.slug.as_str()) {
                return Err(PollerError::Config(format!(
                    "duplicate operator slug '{}'",
                    op.slug
                )));
            }
            if !op.enable {
                continue;
            }

            registry.resolve(op)?;

            if op.polling_interval_seconds == Some(0) {
                return Err(PollerError::Config(format!(
                    "operator '{}': pollingIntervalSeconds must be positive",
                    op.slug
                )));
            }

            for (kind, index, feed) in op.enabled_feeds() {
                if feed.primary_url().trim().is_empty() {
                    return Err(PollerError::Config(format!(
                        "operator '{}': {} feed #{} has no url",
                        op.slug, kind, index
                    )));
                }
                if feed.polling_interval_seconds() == Some(0) {
                    return Err(PollerError::Config(format!(
                        "operator '{}': {} feed #{} pollingIntervalSeconds must be positive",
                        op.slug, kind, index
                    )));
                }
            }
        }
        Ok(())
    }

    /// `feed ?? operator ?? default`
    pub fn polling_interval(&self, operator: &OperatorConfig, feed: &FeedConfig) -> Duration {
        let secs = feed
            .polling_interval_seconds()
            .or(operator.polling_interval_seconds)
            .unwrap_or(self.default_polling_interval);
        Duration::from_secs(secs)
    }

    fn default_polling_interval() -> u64 {
        60
    }
    fn default_vehicle_ttl_seconds() -> u64 {
        180
    }
    fn default_trip_history_len() -> usize {
        50
    }
    fn default_recovery_max_age_minutes() -> i64 {
        5
    }
    fn default_http_timeout_secs() -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_json_str(r#"{ "operators": [] }"#).unwrap();
        assert_eq!(config.default_polling_interval, 60);
        assert_eq!(config.vehicle_ttl_seconds, 180);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_ms, 1000);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_polling_interval_precedence() {
        let config = Config::from_json_str(sample_config()).unwrap();
        let op = &config.operators[0];
        let feeds = op.feeds();

        // avl #0 overrides at feed level
        assert_eq!(config.polling_interval(op, &feeds[0].2), Duration::from_secs(15));
        // gtfsrt #0 inherits the operator override
        assert_eq!(config.polling_interval(op, &feeds[1].2), Duration::from_secs(30));

        let other = &config.operators[1];
        let other_feeds = other.feeds();
        assert_eq!(
            config.polling_interval(other, &other_feeds[0].2),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_enabled_feeds_respects_flags() {
        let config = Config::from_json_str(sample_config()).unwrap();
        let op = &config.operators[0];

        let enabled: Vec<_> = op
            .enabled_feeds()
            .into_iter()
            .map(|(kind, index, _)| (kind, index))
            .collect();
        assert_eq!(enabled, vec![(FeedKind::Avl, 0), (FeedKind::GtfsRt, 0)]);

        // disabled operator polls nothing
        assert!(config.operators[2].enabled_feeds().is_empty());
    }

    #[test]
    fn test_adapter_alias_and_extension() {
        let config = Config::from_json_str(sample_config()).unwrap();
        assert_eq!(config.operators[0].adapter_id(), Some("busitalia_veneto_padua"));
        assert_eq!(config.operators[1].adapter_id(), None);
    }

    #[test]
    fn test_validate_accepts_sample() {
        let config = Config::from_json_str(sample_config()).unwrap();
        config.validate(&registry()).unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_adapter() {
        let config = Config::from_json_str(
            r#"{ "operators": [{ "slug": "x", "enable": true, "adapter": "nope" }] }"#,
        )
        .unwrap();
        let err = config.validate(&registry()).unwrap_err();
        assert!(matches!(err, PollerError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_slug() {
        let config = Config::from_json_str(
            r#"{ "operators": [{ "slug": "x" }, { "slug": "x" }] }"#,
        )
        .unwrap();
        assert!(config.validate(&registry()).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_feed_url() {
        let config = Config::from_json_str(
            r#"{ "operators": [{ "slug": "x", "enable": true,
                 "gtfsrt": [{ "enable": true, "url": " " }] }] }"#,
        )
        .unwrap();
        assert!(config.validate(&registry()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, PollerError::Config(_)));
    }

    // Helper functions for tests
    fn registry() -> AdapterRegistry {
        AdapterRegistry::with_builtin(std::sync::Arc::new(crate::fetch::mock::MockClient::new()))
    }

    fn sample_config() -> &'static str {
        r#"{
            "operators": [
                {
                    "slug": "busitalia",
                    "name": "Busitalia Veneto",
                    "enable": true,
                    "filename": "busitalia_veneto_padua.js",
                    "pollingIntervalSeconds": 30,
                    "avl": [{
                        "enable": true,
                        "pollingIntervalSeconds": 15,
                        "login": { "url": "https://avl.example/login", "username": "u", "password": "p" },
                        "vehicles": { "url": "https://avl.example/vehicles" }
                    }],
                    "gtfsrt": [
                        { "enable": true, "label": "urbano", "url": "https://rt.example/vp" },
                        { "enable": false, "label": "extra", "url": "https://rt.example/vp2" }
                    ],
                    "siri": [{ "enable": false, "endpoint": "https://siri.example" }]
                },
                {
                    "slug": "generic_op",
                    "enable": true,
                    "gtfsrt": [{ "enable": true, "pollingIntervalSeconds": 45, "url": "https://rt.example/other" }]
                },
                {
                    "slug": "sleeping",
                    "enable": false,
                    "gtfsrt": [{ "enable": true, "url": "https://rt.example/sleep" }]
                }
            ]
        }"#
    }
}

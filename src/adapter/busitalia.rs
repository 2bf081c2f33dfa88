//! Busitalia Veneto (Padua): proprietary AVL plus a basic-auth GTFS-RT feed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{Adapter, Credentials, avl_login};
use crate::config::{AvlFeedConfig, GtfsRtFeedConfig};
use crate::error::{PollerError, Result};
use crate::fetch::auth::{Authorization, basic_credentials, build_headers};
use crate::fetch::{HttpClient, fetch_bytes, fetch_json};
use crate::model::{Candidate, GtfsRtBatch};
use crate::normalize::{avl, gtfsrt};
use crate::parser::parse_feed;

pub struct BusitaliaAdapter {
    http: Arc<dyn HttpClient>,
}

impl BusitaliaAdapter {
    pub const ID: &'static str = "busitalia_veneto_padua";

    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Adapter for BusitaliaAdapter {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn login(&self, credentials: &Credentials) -> Result<String> {
        match credentials {
            Credentials::Avl(login) => avl_login(self.http.as_ref(), login).await,
            Credentials::Basic { username, password } => Ok(basic_credentials(username, password)),
        }
    }

    async fn fetch_vehicles(&self, token: &str, feed: &AvlFeedConfig) -> Result<Vec<Candidate>> {
        let headers = build_headers(&feed.vehicles.headers, Authorization::Bearer(token))?;
        let payload = fetch_json(self.http.as_ref(), &feed.vehicles.url, headers).await?;

        // this endpoint only ever wraps the list in `data`
        let entries = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| PollerError::Parse("Busitalia AVL payload has no `data` array".to_string()))?;
        Ok(avl::parse_vehicles(entries))
    }

    async fn fetch_vehicles_gtfsrt(
        &self,
        token: Option<&str>,
        feed: &GtfsRtFeedConfig,
    ) -> Result<GtfsRtBatch> {
        let auth = token.map_or(Authorization::None, Authorization::Basic);
        let headers = build_headers(&feed.headers, auth)?;
        let bytes = fetch_bytes(self.http.as_ref(), &feed.url, headers).await?;
        let message = parse_feed(&bytes)?;

        let batch = gtfsrt::extract(&message);
        debug!(
            url = %feed.url,
            entities = message.entity.len(),
            vehicles = batch.vehicles.len(),
            "GTFS-RT feed decoded"
        );
        Ok(batch)
    }
}

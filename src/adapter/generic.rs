use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Adapter, Credentials, GENERIC_ADAPTER_ID, avl_login};
use crate::config::AvlFeedConfig;
use crate::error::Result;
use crate::fetch::auth::{Authorization, basic_credentials, build_headers};
use crate::fetch::{HttpClient, fetch_json};
use crate::model::Candidate;
use crate::normalize::avl;

/// Serves operators without a dedicated adapter. Understands the standard AVL
/// login and vehicle list in any of the shapes [`avl::vehicle_entries`] accepts.
pub struct GenericAdapter {
    http: Arc<dyn HttpClient>,
}

impl GenericAdapter {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Adapter for GenericAdapter {
    fn id(&self) -> &str {
        GENERIC_ADAPTER_ID
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
        let entries = avl::vehicle_entries(&payload)?;
        let candidates = avl::parse_vehicles(entries);
        debug!(url = %feed.vehicles.url, raw = entries.len(), parsed = candidates.len(), "AVL vehicles fetched");
        Ok(candidates)
    }
}

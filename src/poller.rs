//! One polling task: a single (operator, feed kind, feed index) tuple.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::adapter::{Adapter, Credentials, fetch_feed};
use crate::config::FeedConfig;
use crate::error::{PollerError, Result};
use crate::model::{FeedKind, FeedPayload, TupleId};
use crate::normalize::{Normalizer, candidate_count};
use crate::retry::RetryPolicy;
use crate::store::{Freshness, VehicleStore, keys};
use crate::token::TokenManager;

/// Collaborators shared by every poller of one scheduler run.
pub struct PollerContext {
    pub tokens: Arc<TokenManager>,
    pub store: Arc<dyn VehicleStore>,
    pub retry: RetryPolicy,
    pub vehicle_ttl: Duration,
    pub trip_history_len: usize,
}

/// Counts for one successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Candidates the adapter returned.
    pub fetched: usize,
    /// Records that passed the recency filter and were written.
    pub accepted: usize,
    pub trip_snapshots: usize,
}

pub struct FeedPoller {
    id: TupleId,
    namespace: String,
    feed: FeedConfig,
    credentials: Option<Credentials>,
    interval: Duration,
    adapter: Arc<dyn Adapter>,
    ctx: Arc<PollerContext>,
    normalizer: Normalizer,
}

impl FeedPoller {
    pub fn new(
        id: TupleId,
        feed: FeedConfig,
        interval: Duration,
        adapter: Arc<dyn Adapter>,
        ctx: Arc<PollerContext>,
    ) -> Self {
        let namespace = keys::namespace(&id.operator, feed.label());
        let credentials = Credentials::for_feed(&feed);
        Self {
            id,
            namespace,
            feed,
            credentials,
            interval,
            adapter,
            ctx,
            normalizer: Normalizer::new(),
        }
    }

    pub fn id(&self) -> &TupleId {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status_pattern(&self) -> String {
        keys::status_pattern(&self.namespace)
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Seeds last-known state from records already in the store, so a restart
    /// does not re-accept samples the store has seen. GTFS-RT tuples also load
    /// the newest trip snapshot per plate. Returns the vehicle count.
    pub async fn rehydrate(&mut self) -> Result<usize> {
        let records = self.ctx.store.bulk_read(&self.status_pattern()).await?;
        let by_key = records.into_iter().filter_map(|(key, record)| {
            keys::plate_from_status_key(&key).map(|plate| (plate.to_string(), record))
        });
        let loaded = self.normalizer.rehydrate(by_key);

        let mut trips = 0;
        if self.id.kind == FeedKind::GtfsRt {
            let heads = self
                .ctx
                .store
                .latest_trip_snapshots(&keys::gtfsrt_pattern(&self.namespace))
                .await?;
            trips = self
                .normalizer
                .rehydrate_trips(heads.into_iter().map(|(_, snapshot)| snapshot));
        }

        debug!(tuple = %self.id, loaded, trips, "Vehicle state rehydrated");
        Ok(loaded)
    }

    /// Whether the store already holds recent records for this tuple.
    pub async fn freshness(&self, max_age_minutes: i64) -> Result<Freshness> {
        self.ctx.store.freshness(&self.status_pattern(), max_age_minutes).await
    }

    /// Runs one cycle and logs its result. Errors end here so one tuple never
    /// disturbs another.
    pub async fn poll_once(&mut self) -> Option<CycleOutcome> {
        match self.run_cycle().await {
            Ok(outcome) => {
                info!(
                    operator = %self.id.operator,
                    feed = %self.id.kind,
                    index = self.id.index,
                    fetched = outcome.fetched,
                    accepted = outcome.accepted,
                    trip_snapshots = outcome.trip_snapshots,
                    "Polling cycle complete"
                );
                Some(outcome)
            }
            Err(e) => {
                error!(
                    operator = %self.id.operator,
                    feed = %self.id.kind,
                    index = self.id.index,
                    error = %e,
                    "Polling cycle failed"
                );
                None
            }
        }
    }

    /// Fetches, filters and stores one payload. State is committed only after
    /// every store write succeeded; on error the cycle changes nothing.
    #[tracing::instrument(skip(self), fields(tuple = %self.id))]
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let this = &*self;
        let payload = self
            .ctx
            .retry
            .run("fetch", move || this.fetch_once())
            .await?;

        let fetched = candidate_count(&payload);
        let staged = self.normalizer.stage(payload);

        if !staged.vehicles.is_empty() {
            let batch = staged
                .vehicles
                .iter()
                .map(|a| (keys::status_key(&self.namespace, &a.key), a.record.clone()))
                .collect();
            self.ctx.store.upsert_vehicles(batch, self.ctx.vehicle_ttl).await?;
        }
        if !staged.trip_snapshots.is_empty() {
            let batch = staged
                .trip_snapshots
                .iter()
                .map(|s| (keys::gtfsrt_key(&self.namespace, &s.plate), s.clone()))
                .collect();
            self.ctx
                .store
                .append_trip_snapshots(batch, self.ctx.trip_history_len)
                .await?;
        }

        self.normalizer.commit(&staged);
        Ok(CycleOutcome {
            fetched,
            accepted: staged.vehicles.len(),
            trip_snapshots: staged.trip_snapshots.len(),
        })
    }

    async fn fetch_once(&self) -> Result<FeedPayload> {
        let token = match &self.credentials {
            Some(credentials) => Some(
                self.ctx
                    .tokens
                    .login(&self.id, self.adapter.as_ref(), credentials)
                    .await?,
            ),
            None => None,
        };

        match fetch_feed(self.adapter.as_ref(), token.as_deref(), &self.feed).await {
            Err(PollerError::Auth(reason)) => {
                // rejected token: make the next attempt log in again
                if let Some(token) = &token {
                    self.ctx.tokens.invalidate(&self.id, token);
                }
                Err(PollerError::Auth(reason))
            }
            other => other,
        }
    }
}

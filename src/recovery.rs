//! Startup recovery: warm each tuple from the store and fetch only where the
//! cached data is stale.

use serde::Serialize;
use tracing::{info, warn};

use crate::poller::FeedPoller;
use crate::store::Freshness;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    /// Tuples whose cached data was fresh enough to skip a fetch.
    pub skipped: usize,
    /// Tuples that ran a fetch, successful or not.
    pub fetched: usize,
    /// Vehicles known after recovery: cached ones for skipped tuples,
    /// freshly accepted ones for fetched tuples.
    pub total_vehicles: usize,
}

/// Rehydrates every poller from the store, then runs one cycle for each tuple
/// whose newest cached record is older than `max_age_minutes`.
pub async fn recover(pollers: &mut [FeedPoller], max_age_minutes: i64) -> RecoverySummary {
    let mut summary = RecoverySummary::default();

    for poller in pollers.iter_mut() {
        let cached = match poller.rehydrate().await {
            Ok(n) => n,
            Err(e) => {
                warn!(tuple = %poller.id(), error = %e, "Could not rehydrate vehicle state");
                0
            }
        };

        let freshness = match poller.freshness(max_age_minutes).await {
            Ok(f) => f,
            Err(e) => {
                warn!(tuple = %poller.id(), error = %e, "Freshness check failed, fetching");
                Freshness {
                    fresh: false,
                    reason: e.to_string(),
                }
            }
        };

        if freshness.fresh {
            info!(tuple = %poller.id(), cached, reason = %freshness.reason, "Cache fresh, skipping fetch");
            summary.skipped += 1;
            summary.total_vehicles += cached;
            continue;
        }

        info!(tuple = %poller.id(), reason = %freshness.reason, "Cache stale, fetching");
        summary.fetched += 1;
        // a failed fetch is already logged by the poller and counts as zero vehicles
        if let Some(outcome) = poller.poll_once().await {
            summary.total_vehicles += outcome.accepted;
        }
    }

    info!(
        skipped = summary.skipped,
        fetched = summary.fetched,
        total_vehicles = summary.total_vehicles,
        "Startup recovery finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::config::Config;
    use crate::error::{PollerError, Result};
    use crate::model::{Candidate, FeedKind, GtfsRtBatch, Position, TupleId, VehicleRecord};
    use crate::poller::PollerContext;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryStore, VehicleStore};
    use crate::token::TokenManager;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fresh_tuple_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "operator:fresh:vehicles:status:1", Utc::now()).await;
        let mut pollers = vec![poller("fresh", FeedAdapter::ok(), store.clone())];

        let summary = recover(&mut pollers, 5).await;

        assert_eq!(summary, RecoverySummary { skipped: 1, fetched: 0, total_vehicles: 1 });
        assert_eq!(pollers[0].normalizer().vehicles().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_tuple_is_fetched() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "operator:stale:vehicles:status:1",
            Utc::now() - chrono::Duration::minutes(30),
        )
        .await;
        let mut pollers = vec![poller("stale", FeedAdapter::ok(), store.clone())];

        let summary = recover(&mut pollers, 5).await;

        assert_eq!(summary, RecoverySummary { skipped: 0, fetched: 1, total_vehicles: 2 });
        assert!(store.get("operator:stale:vehicles:status:7").is_some());
    }

    #[tokio::test]
    async fn test_failed_fetch_counts_zero_vehicles() {
        let store = Arc::new(MemoryStore::new());
        let mut pollers = vec![
            poller("broken", FeedAdapter::failing(), store.clone()),
            poller("healthy", FeedAdapter::ok(), store.clone()),
        ];

        let summary = recover(&mut pollers, 5).await;

        assert_eq!(summary, RecoverySummary { skipped: 0, fetched: 2, total_vehicles: 2 });
    }

    // Helper functions for tests
    struct FeedAdapter {
        fail: bool,
    }

    impl FeedAdapter {
        fn ok() -> Arc<Self> {
            Arc::new(Self { fail: false })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { fail: true })
        }
    }

    #[async_trait]
    impl Adapter for FeedAdapter {
        fn id(&self) -> &str {
            "feed"
        }

        async fn fetch_vehicles_gtfsrt(
            &self,
            _token: Option<&str>,
            _feed: &crate::config::GtfsRtFeedConfig,
        ) -> Result<GtfsRtBatch> {
            if self.fail {
                return Err(PollerError::Parse("not protobuf".to_string()));
            }
            Ok(GtfsRtBatch {
                vehicles: vec![vehicle("7", 45.0), vehicle("8", 45.1)],
                trip_snapshots: Vec::new(),
            })
        }
    }

    fn vehicle(plate: &str, lat: f64) -> Candidate {
        let mut record = record(plate, Utc::now());
        record.position.lat = lat;
        Candidate {
            source_id: plate.to_string(),
            record,
        }
    }

    fn record(plate: &str, timestamp: chrono::DateTime<Utc>) -> VehicleRecord {
        VehicleRecord {
            plate: plate.to_string(),
            timestamp,
            position: Position { lat: 45.0, lon: 11.8 },
            speed: None,
            bearing: None,
            door: None,
            trip: None,
        }
    }

    async fn seed(store: &MemoryStore, key: &str, timestamp: chrono::DateTime<Utc>) {
        store
            .upsert_vehicles(vec![(key.to_string(), record("1", timestamp))], Duration::from_secs(3600))
            .await
            .unwrap();
    }

    fn poller(slug: &str, adapter: Arc<FeedAdapter>, store: Arc<MemoryStore>) -> FeedPoller {
        let config = Config::from_json_str(&format!(
            r#"{{ "operators": [{{ "slug": "{slug}", "enable": true,
                "gtfsrt": [{{ "enable": true, "url": "https://rt.example/{slug}" }}] }}] }}"#
        ))
        .unwrap();
        let (_, _, feed) = config.operators[0].feeds().remove(0);
        let ctx = Arc::new(PollerContext {
            tokens: Arc::new(TokenManager::new()),
            store,
            retry: RetryPolicy::new(1, Duration::ZERO),
            vehicle_ttl: Duration::from_secs(180),
            trip_history_len: 50,
        });
        FeedPoller::new(TupleId::new(slug, FeedKind::GtfsRt, 0), feed, Duration::from_secs(60), adapter, ctx)
    }
}

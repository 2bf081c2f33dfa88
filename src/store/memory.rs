use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::VehicleStore;
use crate::error::{PollerError, Result};
use crate::model::{TripSnapshot, VehicleRecord};

const EVENT_CAPACITY: usize = 1024;

/// A record published after it was written, as a Redis subscriber would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    pub payload: String,
}

#[derive(Default)]
struct Inner {
    vehicles: HashMap<String, (VehicleRecord, Instant)>,
    trips: HashMap<String, VecDeque<TripSnapshot>>,
}

/// Process-local store. Expired records are dropped lazily on read.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Live record stored under `key`.
    pub fn get(&self, key: &str) -> Option<VehicleRecord> {
        let now = Instant::now();
        self.lock()
            .vehicles
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(record, _)| record.clone())
    }

    pub fn trip_snapshots(&self, key: &str) -> Vec<TripSnapshot> {
        self.lock()
            .trips
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl VehicleStore for MemoryStore {
    async fn upsert_vehicles(&self, batch: Vec<(String, VehicleRecord)>, ttl: Duration) -> Result<()> {
        let mut payloads = Vec::with_capacity(batch.len());
        for (key, record) in &batch {
            let payload = serde_json::to_string(record)
                .map_err(|e| PollerError::Store(format!("failed to serialize {key}: {e}")))?;
            payloads.push(StoreEvent {
                key: key.clone(),
                payload,
            });
        }

        {
            let expires = Instant::now() + ttl;
            let mut inner = self.lock();
            for (key, record) in batch {
                inner.vehicles.insert(key, (record, expires));
            }
        }

        for event in payloads {
            // no subscribers is fine
            let _ = self.events.send(event);
        }
        Ok(())
    }

    async fn append_trip_snapshots(&self, batch: Vec<(String, TripSnapshot)>, max_len: usize) -> Result<()> {
        let mut inner = self.lock();
        for (key, snapshot) in batch {
            let list = inner.trips.entry(key).or_default();
            list.push_front(snapshot);
            list.truncate(max_len);
        }
        Ok(())
    }

    async fn bulk_read(&self, pattern: &str) -> Result<Vec<(String, VehicleRecord)>> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.vehicles.retain(|_, (_, expires)| *expires > now);

        let mut records: Vec<(String, VehicleRecord)> = inner
            .vehicles
            .iter()
            .filter(|(key, _)| matches(pattern, key))
            .map(|(key, (record, _))| (key.clone(), record.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn latest_trip_snapshots(&self, pattern: &str) -> Result<Vec<(String, TripSnapshot)>> {
        let inner = self.lock();
        let mut heads: Vec<(String, TripSnapshot)> = inner
            .trips
            .iter()
            .filter(|(key, _)| matches(pattern, key))
            .filter_map(|(key, list)| list.front().map(|head| (key.clone(), head.clone())))
            .collect();
        heads.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(heads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, TripMetadata};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_upsert_then_read() {
        let store = MemoryStore::new();

        store
            .upsert_vehicles(
                vec![
                    ("operator:a:vehicles:status:1".to_string(), record("1")),
                    ("operator:b:vehicles:status:2".to_string(), record("2")),
                ],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let a = store.bulk_read("operator:a:vehicles:status:*").await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].1.plate, "1");
        assert_eq!(store.get("operator:b:vehicles:status:2").unwrap().plate, "2");
    }

    #[tokio::test]
    async fn test_upsert_publishes_written_value() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        store
            .upsert_vehicles(vec![("k".to_string(), record("1"))], Duration::from_secs(60))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.key, "k");
        let published: VehicleRecord = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(published, store.get("k").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .upsert_vehicles(vec![("k".to_string(), record("1"))], Duration::from_secs(180))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(179)).await;
        assert!(store.get("k").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").is_none());
        assert!(store.bulk_read("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trip_list_is_bounded_most_recent_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_trip_snapshots(vec![("t".to_string(), snapshot(&format!("trip-{i}")))], 3)
                .await
                .unwrap();
        }

        let list = store.trip_snapshots("t");
        let ids: Vec<_> = list.iter().map(|s| s.trip.trip_id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["trip-4", "trip-3", "trip-2"]);
    }

    #[tokio::test]
    async fn test_latest_trip_snapshots_reads_list_heads() {
        let store = MemoryStore::new();
        store
            .append_trip_snapshots(
                vec![
                    ("operator:a:vehicles:gtfsrt:1".to_string(), snapshot("old")),
                    ("operator:b:vehicles:gtfsrt:1".to_string(), snapshot("other")),
                ],
                10,
            )
            .await
            .unwrap();
        store
            .append_trip_snapshots(vec![("operator:a:vehicles:gtfsrt:1".to_string(), snapshot("new"))], 10)
            .await
            .unwrap();

        let heads = store.latest_trip_snapshots("operator:a:vehicles:gtfsrt:*").await.unwrap();

        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].1.trip.trip_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_exact_pattern() {
        let store = MemoryStore::new();
        store
            .upsert_vehicles(
                vec![("ab".to_string(), record("1")), ("abc".to_string(), record("2"))],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(store.bulk_read("ab").await.unwrap().len(), 1);
        assert_eq!(store.bulk_read("ab*").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_freshness_from_store() {
        let store = MemoryStore::new();
        assert!(!store.freshness("*", 5).await.unwrap().fresh);

        let mut recent = record("1");
        recent.timestamp = Utc::now();
        store
            .upsert_vehicles(vec![("k".to_string(), recent)], Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.freshness("*", 5).await.unwrap().fresh);
    }

    // Helper functions for tests
    fn record(plate: &str) -> VehicleRecord {
        VehicleRecord {
            plate: plate.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            position: Position { lat: 45.4, lon: 11.8 },
            speed: None,
            bearing: None,
            door: None,
            trip: None,
        }
    }

    fn snapshot(trip_id: &str) -> TripSnapshot {
        TripSnapshot {
            plate: "1".to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            trip: TripMetadata {
                trip_id: Some(trip_id.to_string()),
                ..Default::default()
            },
        }
    }
}

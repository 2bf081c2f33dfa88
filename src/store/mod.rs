//! Cache store contract for accepted vehicle records and trip snapshots.

pub mod keys;
mod memory;
#[cfg(feature = "redis-store")]
mod redis;

pub use memory::{MemoryStore, StoreEvent};
#[cfg(feature = "redis-store")]
pub use redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{TripSnapshot, VehicleRecord};

/// Whether cached data under a key pattern is recent enough to skip a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub fresh: bool,
    pub reason: String,
}

#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Writes every record with the given expiry, then publishes each one on
    /// its own key. The batch is applied as a whole or not at all.
    async fn upsert_vehicles(&self, batch: Vec<(String, VehicleRecord)>, ttl: Duration) -> Result<()>;

    /// Prepends snapshots to their lists, keeping at most `max_len` entries
    /// per list, most recent first.
    async fn append_trip_snapshots(&self, batch: Vec<(String, TripSnapshot)>, max_len: usize) -> Result<()>;

    /// Every live record whose key matches `pattern` (a trailing `*` matches
    /// any suffix).
    async fn bulk_read(&self, pattern: &str) -> Result<Vec<(String, VehicleRecord)>>;

    /// Most recent snapshot of every trip list whose key matches `pattern`.
    async fn latest_trip_snapshots(&self, pattern: &str) -> Result<Vec<(String, TripSnapshot)>>;

    async fn freshness(&self, pattern: &str, max_age_minutes: i64) -> Result<Freshness> {
        let records = self.bulk_read(pattern).await?;
        Ok(freshness_of(
            records.iter().map(|(_, record)| record.timestamp),
            Utc::now(),
            max_age_minutes,
        ))
    }
}

/// Judges freshness from the newest timestamp in `timestamps`.
pub fn freshness_of(
    timestamps: impl IntoIterator<Item = DateTime<Utc>>,
    now: DateTime<Utc>,
    max_age_minutes: i64,
) -> Freshness {
    let Some(newest) = timestamps.into_iter().max() else {
        return Freshness {
            fresh: false,
            reason: "no cached records".to_string(),
        };
    };

    let age = now.signed_duration_since(newest);
    if age.num_seconds() <= max_age_minutes * 60 {
        Freshness {
            fresh: true,
            reason: format!("newest record is {}s old", age.num_seconds()),
        }
    } else {
        Freshness {
            fresh: false,
            reason: format!(
                "newest record is {}s old, older than {max_age_minutes} min",
                age.num_seconds()
            ),
        }
    }
}

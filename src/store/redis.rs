use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{info, warn};

use super::VehicleStore;
use crate::error::{PollerError, Result};
use crate::model::{TripSnapshot, VehicleRecord};

/// Redis-backed store: records are JSON strings with `EX` expiry, published on
/// their own key; trip snapshots are capped lists.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

fn to_json<T: serde::Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PollerError::Store(format!("failed to serialize {key}: {e}")))
}

#[async_trait]
impl VehicleStore for RedisStore {
    async fn upsert_vehicles(&self, batch: Vec<(String, VehicleRecord)>, ttl: Duration) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ttl_secs = ttl.as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, record) in &batch {
            let json = to_json(key, record)?;
            pipe.set_ex(key, &json, ttl_secs).ignore();
            pipe.publish(key, &json).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn append_trip_snapshots(&self, batch: Vec<(String, TripSnapshot)>, max_len: usize) -> Result<()> {
        if batch.is_empty() || max_len == 0 {
            return Ok(());
        }
        let stop = isize::try_from(max_len).unwrap_or(isize::MAX) - 1;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, snapshot) in &batch {
            let json = to_json(key, snapshot)?;
            pipe.lpush(key, json).ignore();
            pipe.ltrim(key, 0, stop).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn bulk_read(&self, pattern: &str) -> Result<Vec<(String, VehicleRecord)>> {
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();

        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(values) {
            // expired between KEYS and MGET
            let Some(value) = value else {
                continue;
            };
            match serde_json::from_str::<VehicleRecord>(&value) {
                Ok(record) => records.push((key, record)),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable cached record"),
            }
        }
        Ok(records)
    }

    async fn latest_trip_snapshots(&self, pattern: &str) -> Result<Vec<(String, TripSnapshot)>> {
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.lindex(key, 0);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut heads = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(values) {
            let Some(value) = value else {
                continue;
            };
            match serde_json::from_str::<TripSnapshot>(&value) {
                Ok(snapshot) => heads.push((key, snapshot)),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable trip snapshot"),
            }
        }
        Ok(heads)
    }
}

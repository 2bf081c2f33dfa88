//! Parsing of proprietary AVL JSON payloads into candidate records.
//!
//! An AVL entry looks like:
//! ```json
//! { "id": 1, "codice": "TRAM007", "last_lat": 45.1, "last_lon": 9.1,
//!   "last_dt_quando": "2024-01-01 10:00:00", "last_velocita": 36000, "porta": 1 }
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Europe::Rome;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{PollerError, Result};
use crate::model::{Candidate, Position, VehicleRecord};

use super::plate::clean_plate;

const AVL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct AvlEntry {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    codice: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    last_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    last_lon: Option<f64>,
    #[serde(default)]
    last_dt_quando: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    last_velocita: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    porta: Option<i64>,
}

/// Locates the vehicle array in a login-protected AVL response. Accepts
/// `{"data": [...]}`, `{"vehicles": [...]}` or a bare array.
pub fn vehicle_entries(payload: &Value) -> Result<&[Value]> {
    let entries = match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("data")
            .or_else(|| map.get("vehicles"))
            .and_then(Value::as_array),
        _ => None,
    };
    entries
        .map(Vec::as_slice)
        .ok_or_else(|| PollerError::Parse("AVL payload has no vehicle array".to_string()))
}

/// Turns raw AVL entries into candidates. Entries without id, coordinates or a
/// parseable timestamp are skipped.
pub fn parse_vehicles(entries: &[Value]) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(entries.len());

    for raw in entries {
        let entry: AvlEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping malformed AVL entry");
                continue;
            }
        };

        let Some(source_id) = entry.id.as_ref().and_then(id_string) else {
            continue;
        };
        // a zero coordinate is how these feeds report "no fix"
        let (Some(lat), Some(lon)) = (
            entry.last_lat.filter(|v| *v != 0.0),
            entry.last_lon.filter(|v| *v != 0.0),
        ) else {
            continue;
        };
        let Some(timestamp) = entry.last_dt_quando.as_deref().and_then(parse_rome_timestamp) else {
            debug!(source_id = %source_id, "Skipping AVL entry without a usable timestamp");
            continue;
        };

        let speed = entry.last_velocita.map(velocity_to_kmh);
        let door = if speed.is_some_and(|s| s >= 1.0) {
            Some(0)
        } else {
            entry.porta
        };

        candidates.push(Candidate {
            source_id,
            record: VehicleRecord {
                plate: clean_plate(entry.codice.as_deref().unwrap_or_default()),
                timestamp,
                position: Position { lat, lon },
                speed,
                bearing: None,
                door,
                trip: None,
            },
        });
    }

    candidates
}

/// Converts a Europe/Rome wall-clock `YYYY-MM-DD HH:MM:SS` string to UTC.
/// Ambiguous autumn times resolve to the earlier instant; times inside the
/// spring gap do not exist and yield `None`.
pub fn parse_rome_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), AVL_TIME_FORMAT).ok()?;
    Rome.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Raw AVL velocity units are 1/10000 m/s.
fn velocity_to_kmh(raw: f64) -> f64 {
    round2(raw / 10000.0 * 3.6)
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::Bool(b)) => Some(i64::from(b)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

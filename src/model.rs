//! Canonical vehicle types shared by adapters, the normalization engine and the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PollerError;

/// The three source families an operator can declare feeds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Avl,
    GtfsRt,
    Siri,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Avl => "avl",
            FeedKind::GtfsRt => "gtfsrt",
            FeedKind::Siri => "siri",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = PollerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avl" => Ok(FeedKind::Avl),
            "gtfsrt" | "gtfs-rt" | "gtfs_rt" => Ok(FeedKind::GtfsRt),
            "siri" => Ok(FeedKind::Siri),
            other => Err(PollerError::UnknownFeedType(other.to_string())),
        }
    }
}

/// Identifies one independently scheduled polling task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub operator: String,
    pub kind: FeedKind,
    pub index: usize,
}

impl TupleId {
    pub fn new(operator: impl Into<String>, kind: FeedKind, index: usize) -> Self {
        Self {
            operator: operator.into(),
            kind,
            index,
        }
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.operator, self.kind, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// Trip assignment reported by a GTFS-RT vehicle position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_relationship: Option<String>,
}

/// Canonical per-vehicle state written to `operator:<ns>:vehicles:status:<plate>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub plate: String,
    pub timestamp: DateTime<Utc>,
    pub position: Position,
    /// km/h
    pub speed: Option<f64>,
    /// Degrees clockwise from north, in `[0, 360)`.
    pub bearing: Option<f64>,
    pub door: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip: Option<TripMetadata>,
}

/// A parsed but not yet accepted sample, carrying the source-native id used as
/// the state key when no plate can be derived.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source_id: String,
    pub record: VehicleRecord,
}

impl Candidate {
    pub fn key(&self) -> &str {
        if self.record.plate.is_empty() {
            &self.source_id
        } else {
            &self.record.plate
        }
    }
}

/// Entry appended to `operator:<ns>:vehicles:gtfsrt:<plate>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub plate: String,
    pub observed_at: DateTime<Utc>,
    pub trip: TripMetadata,
}

/// Output of a GTFS-RT fetch: position candidates plus trip metadata seen in the same feed.
#[derive(Debug, Clone, Default)]
pub struct GtfsRtBatch {
    pub vehicles: Vec<Candidate>,
    pub trip_snapshots: Vec<TripSnapshot>,
}

/// What one fetch produced, tagged by the source family that produced it.
#[derive(Debug, Clone)]
pub enum FeedPayload {
    Avl(Vec<Candidate>),
    GtfsRt(GtfsRtBatch),
    Siri(Vec<Candidate>),
}

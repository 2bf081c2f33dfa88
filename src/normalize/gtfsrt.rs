//! Extraction of vehicle positions and trip assignments from a GTFS-RT feed.

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::gtfs_rt::trip_descriptor::ScheduleRelationship;
use crate::gtfs_rt::{FeedMessage, TripDescriptor};
use crate::model::{Candidate, GtfsRtBatch, Position, TripMetadata, TripSnapshot, VehicleRecord};

use super::avl::round2;
use super::plate::clean_plate;

/// Builds position candidates and trip snapshots from every vehicle entity
/// that has both an identity and a position. Entities without their own
/// timestamp inherit the feed header timestamp.
pub fn extract(feed: &FeedMessage) -> GtfsRtBatch {
    let header_ts = feed.header.timestamp.and_then(epoch_to_utc);
    let mut batch = GtfsRtBatch::default();
    let mut skipped = 0usize;

    for entity in &feed.entity {
        if entity.is_deleted.unwrap_or(false) {
            continue;
        }
        let Some(vehicle) = &entity.vehicle else {
            continue;
        };

        let descriptor = vehicle.vehicle.as_ref();
        let label = descriptor.and_then(|d| d.label.as_deref()).filter(|l| !l.trim().is_empty());
        let vehicle_id = descriptor.and_then(|d| d.id.as_deref()).filter(|id| !id.trim().is_empty());
        if label.is_none() && vehicle_id.is_none() {
            skipped += 1;
            continue;
        }
        let Some(pos) = &vehicle.position else {
            skipped += 1;
            continue;
        };
        let Some(timestamp) = vehicle.timestamp.and_then(epoch_to_utc).or(header_ts) else {
            skipped += 1;
            continue;
        };

        let plate = label.map(clean_plate).unwrap_or_default();
        let source_id = vehicle_id.unwrap_or(entity.id.as_str()).to_string();
        let trip = vehicle.trip.as_ref().map(trip_metadata);

        let candidate = Candidate {
            source_id,
            record: VehicleRecord {
                plate,
                timestamp,
                position: Position {
                    lat: f64::from(pos.latitude),
                    lon: f64::from(pos.longitude),
                },
                // feed speed is m/s
                speed: pos.speed.map(|s| round2(f64::from(s) * 3.6)),
                bearing: pos.bearing.map(f64::from),
                door: None,
                trip: trip.clone(),
            },
        };

        if let Some(trip) = trip {
            batch.trip_snapshots.push(TripSnapshot {
                plate: candidate.key().to_string(),
                observed_at: timestamp,
                trip,
            });
        }
        batch.vehicles.push(candidate);
    }

    if skipped > 0 {
        debug!(skipped, "Skipped GTFS-RT entities without identity, position or timestamp");
    }
    batch
}

fn trip_metadata(trip: &TripDescriptor) -> TripMetadata {
    TripMetadata {
        trip_id: trip.trip_id.clone(),
        route_id: trip.route_id.clone(),
        direction_id: trip.direction_id,
        start_time: trip.start_time.clone(),
        start_date: trip.start_date.clone(),
        schedule_relationship: trip
            .schedule_relationship
            .and_then(|v| ScheduleRelationship::try_from(v).ok())
            .map(|r| r.as_str_name().to_string()),
    }
}

fn epoch_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

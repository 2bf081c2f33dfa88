//! Normalization and deduplication of adapter output.
//!
//! Adapters turn raw payloads into [`Candidate`]s (see [`avl`] and [`gtfsrt`]);
//! a [`Normalizer`] owned by one polling task filters them against that
//! task's last-known state.

pub mod avl;
pub mod gtfsrt;
pub mod plate;
pub mod state;

pub use plate::clean_plate;
pub use state::{Accepted, DerivePolicy, TripSnapshotState, VehicleState};

use crate::model::{FeedPayload, TripSnapshot, VehicleRecord};

/// Changes one payload would make, not yet applied.
#[derive(Debug, Default)]
pub struct Staged {
    pub vehicles: Vec<Accepted>,
    pub trip_snapshots: Vec<TripSnapshot>,
}

impl Staged {
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty() && self.trip_snapshots.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Normalizer {
    vehicles: VehicleState,
    trips: TripSnapshotState,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vehicles(&self) -> &VehicleState {
        &self.vehicles
    }

    pub fn trips(&self) -> &TripSnapshotState {
        &self.trips
    }

    pub fn rehydrate(&mut self, records: impl IntoIterator<Item = (String, VehicleRecord)>) -> usize {
        self.vehicles.rehydrate(records)
    }

    pub fn rehydrate_trips(&mut self, snapshots: impl IntoIterator<Item = TripSnapshot>) -> usize {
        self.trips.rehydrate(snapshots)
    }

    pub fn stage(&self, payload: FeedPayload) -> Staged {
        match payload {
            FeedPayload::Avl(candidates) => Staged {
                vehicles: self.vehicles.stage(candidates, DerivePolicy::AVL),
                trip_snapshots: Vec::new(),
            },
            FeedPayload::GtfsRt(batch) => Staged {
                vehicles: self.vehicles.stage(batch.vehicles, DerivePolicy::GTFS_RT),
                trip_snapshots: self.trips.stage(batch.trip_snapshots),
            },
            FeedPayload::Siri(candidates) => Staged {
                vehicles: self.vehicles.stage(candidates, DerivePolicy::GTFS_RT),
                trip_snapshots: Vec::new(),
            },
        }
    }

    pub fn commit(&mut self, staged: &Staged) {
        self.vehicles.commit(&staged.vehicles);
        self.trips.commit(&staged.trip_snapshots);
    }
}

/// Candidates count, for logging before they are filtered.
pub fn candidate_count(payload: &FeedPayload) -> usize {
    match payload {
        FeedPayload::Avl(c) | FeedPayload::Siri(c) => c.len(),
        FeedPayload::GtfsRt(batch) => batch.vehicles.len(),
    }
}

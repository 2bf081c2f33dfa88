//! Last-known vehicle state and the recency filter applied to every sample.
//!
//! Acceptance is computed in two steps: [`VehicleState::stage`] decides what a
//! payload would change without touching the map, and [`VehicleState::commit`]
//! applies it once the store write went through. A failed write therefore
//! leaves the state exactly as it was.

use std::collections::HashMap;

use crate::geo_math;
use crate::model::{Candidate, TripMetadata, TripSnapshot, VehicleRecord};

/// Which derived fields may be filled in from the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivePolicy {
    pub bearing: bool,
    pub speed: bool,
}

impl DerivePolicy {
    /// AVL feeds report speed themselves; only heading is derived.
    pub const AVL: Self = Self {
        bearing: true,
        speed: false,
    };
    /// GTFS-RT fields are derived only where the feed left them out.
    pub const GTFS_RT: Self = Self {
        bearing: true,
        speed: true,
    };
}

/// A sample that passed the recency test, keyed by its state key.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub key: String,
    pub record: VehicleRecord,
}

#[derive(Debug, Default)]
pub struct VehicleState {
    vehicles: HashMap<String, VehicleRecord>,
}

impl VehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&VehicleRecord> {
        self.vehicles.get(key)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Seeds the state from cached records. Older records never replace newer ones.
    pub fn rehydrate(&mut self, records: impl IntoIterator<Item = (String, VehicleRecord)>) -> usize {
        let mut loaded = 0;
        for (key, record) in records {
            if key.is_empty() {
                continue;
            }
            if self.vehicles.get(&key).is_some_and(|prev| record.timestamp <= prev.timestamp) {
                continue;
            }
            self.vehicles.insert(key, record);
            loaded += 1;
        }
        loaded
    }

    /// Applies the recency filter and derives missing fields, without mutating
    /// the state. Repeated keys within one payload are judged against the
    /// samples accepted earlier in the same payload; only the newest survives.
    pub fn stage(&self, candidates: Vec<Candidate>, policy: DerivePolicy) -> Vec<Accepted> {
        let mut accepted: Vec<Accepted> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let key = candidate.key().to_string();
            if key.is_empty() {
                continue;
            }

            let prev = index_by_key
                .get(&key)
                .map(|&i| &accepted[i].record)
                .or_else(|| self.vehicles.get(&key));

            if prev.is_some_and(|p| candidate.record.timestamp <= p.timestamp) {
                continue;
            }

            let mut record = candidate.record;
            if let Some(prev) = prev {
                derive_fields(prev, &mut record, policy);
            }

            match index_by_key.get(&key) {
                Some(&i) => accepted[i].record = record,
                None => {
                    index_by_key.insert(key.clone(), accepted.len());
                    accepted.push(Accepted { key, record });
                }
            }
        }

        accepted
    }

    pub fn commit(&mut self, accepted: &[Accepted]) {
        for a in accepted {
            self.vehicles.insert(a.key.clone(), a.record.clone());
        }
    }

    /// `stage` followed by `commit`.
    pub fn apply(&mut self, candidates: Vec<Candidate>, policy: DerivePolicy) -> Vec<Accepted> {
        let accepted = self.stage(candidates, policy);
        self.commit(&accepted);
        accepted
    }
}

fn derive_fields(prev: &VehicleRecord, record: &mut VehicleRecord, policy: DerivePolicy) {
    let (from, to) = (prev.position, record.position);

    if policy.bearing && record.bearing.is_none() {
        // identical points yield 0
        record.bearing = Some(geo_math::bearing(from.lat, from.lon, to.lat, to.lon));
    }

    if policy.speed && record.speed.is_none() {
        record.speed = geo_math::speed_kmh(
            from.lat,
            from.lon,
            to.lat,
            to.lon,
            prev.timestamp,
            record.timestamp,
        );
    }
}

/// Last trip assignment seen per plate.
#[derive(Debug, Default)]
pub struct TripSnapshotState {
    last: HashMap<String, TripMetadata>,
}

impl TripSnapshotState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, plate: &str) -> Option<&TripMetadata> {
        self.last.get(plate)
    }

    /// Seeds the last trip per plate from the head of each stored list, so a
    /// restart does not append an unchanged trip again. Plates already known
    /// keep their in-memory value.
    pub fn rehydrate(&mut self, snapshots: impl IntoIterator<Item = TripSnapshot>) -> usize {
        let mut loaded = 0;
        for snapshot in snapshots {
            if snapshot.plate.is_empty() || self.last.contains_key(&snapshot.plate) {
                continue;
            }
            self.last.insert(snapshot.plate, snapshot.trip);
            loaded += 1;
        }
        loaded
    }

    /// Snapshots whose trip metadata differs from the last one stored for the
    /// same plate, in feed order.
    pub fn stage(&self, snapshots: Vec<TripSnapshot>) -> Vec<TripSnapshot> {
        let mut pending: HashMap<String, TripMetadata> = HashMap::new();
        let mut changed = Vec::new();

        for snapshot in snapshots {
            if snapshot.plate.is_empty() {
                continue;
            }
            let last = pending
                .get(&snapshot.plate)
                .or_else(|| self.last.get(&snapshot.plate));
            if last == Some(&snapshot.trip) {
                continue;
            }
            pending.insert(snapshot.plate.clone(), snapshot.trip.clone());
            changed.push(snapshot);
        }

        changed
    }

    pub fn commit(&mut self, snapshots: &[TripSnapshot]) {
        for s in snapshots {
            self.last.insert(s.plate.clone(), s.trip.clone());
        }
    }
}

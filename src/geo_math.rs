//! Great-circle helpers used to derive bearing and speed between two samples.

use chrono::{DateTime, Utc};
use geo::{HaversineBearing, HaversineDistance, Point};

/// Initial bearing from `(lat1, lon1)` towards `(lat2, lon2)` in degrees,
/// normalized to `[0, 360)` with 0 = north and 90 = east.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1, lat1);
    let to = Point::new(lon2, lat2);
    if from == to {
        return 0.0;
    }
    let deg = from.haversine_bearing(to).rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if deg >= 360.0 { 0.0 } else { deg }
}

/// Haversine distance in meters.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Point::new(lon1, lat1).haversine_distance(&Point::new(lon2, lat2))
}

/// Average speed in km/h between two timestamped positions, or `None` when the
/// elapsed time is zero or negative.
pub fn speed_kmh(
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
    t1: DateTime<Utc>,
    t2: DateTime<Utc>,
) -> Option<f64> {
    let elapsed_secs = (t2 - t1).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return None;
    }
    Some(distance_m(lat1, lon1, lat2, lon2) / elapsed_secs * 3.6)
}

//! Great-circle distance and bearing between latitude/longitude points.
//!
//! Thin wrapper over the `geo` haversine algorithms so the rest of the crate
//! can speak in `(lat, lon)` order instead of `geo`'s `(x = lon, y = lat)`.

use geo::{HaversineBearing, HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }

    /// Initial bearing towards `other` in degrees, normalised to `[0, 360)`.
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        let bearing = self.to_point().haversine_bearing(other.to_point());
        bearing.rem_euclid(360.0)
    }
}

/// Great-circle distance in meters between two points.
pub fn distance_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    a.distance_to(b)
}

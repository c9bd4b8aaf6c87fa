//! Geospatial helpers for `$near` / `$within`
//!
//! Points are `[lat, lon]` arrays or `{ "lat": .., "lon": .. }` objects;
//! distances are kilometres.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const EARTH_RADIUS_KM: f64 = 6371.0088;
const KM_PER_DEGREE_LAT: f64 = 111.32;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Query-side geospatial operand: a centre and a radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoQuery {
    pub lat: f64,
    pub lon: f64,
    pub distance: f64,
}

impl GeoPoint {
    /// Read a point out of a document value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) if items.len() == 2 => Some(Self {
                lat: items[0].as_f64()?,
                lon: items[1].as_f64()?,
            }),
            Value::Object(map) => Some(Self {
                lat: map.get("lat")?.as_f64()?,
                lon: map.get("lon")?.as_f64()?,
            }),
            _ => None,
        }
    }

    /// Great-circle (haversine) distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

impl GeoQuery {
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }

    /// `$near`: great-circle distance within the radius.
    pub fn is_near(&self, point: &GeoPoint) -> bool {
        self.center().distance_km(point) <= self.distance
    }

    /// `$within`: inside the lat/lon box of half-side `distance` km.
    pub fn is_within(&self, point: &GeoPoint) -> bool {
        let d_lat = self.distance / KM_PER_DEGREE_LAT;
        let lon_scale = (KM_PER_DEGREE_LAT * self.lat.to_radians().cos()).max(f64::EPSILON);
        let d_lon = self.distance / lon_scale;
        (point.lat - self.lat).abs() <= d_lat && (point.lon - self.lon).abs() <= d_lon
    }
}

//! Position data and platform location preconditions.
//!
//! The platform-specific plumbing that produces positions and answers
//! permission questions lives outside this crate; it feeds positions into a
//! `tokio::sync::watch` channel and implements [`LocationEnvironment`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality of a position fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixQuality {
    /// Approximate fix, e.g. from a network provider
    Coarse,
    /// Satellite-grade fix
    Accurate,
}

/// A single device position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Estimated accuracy in meters, if the provider reports one
    pub accuracy: Option<f64>,
    /// Altitude in meters above sea level, if known
    pub altitude: Option<f64>,
    /// Ground speed in meters per second, if known
    pub speed: Option<f64>,
    /// When the fix was obtained
    pub timestamp: DateTime<Utc>,
    /// Fix quality reported by the provider
    pub fix: FixQuality,
}

impl Position {
    /// Great-circle distance to another position, in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Answers the platform precondition checks that gate session initiation.
pub trait LocationEnvironment: Send + Sync {
    /// Whether the user has granted the location permission.
    fn permission_granted(&self) -> bool;

    /// Whether device location services are switched on.
    fn services_enabled(&self) -> bool;
}

/// An environment without a permission broker, e.g. a desktop host.
///
/// Both checks always pass; position availability is then purely a matter of
/// what the producer feeds into the position channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrestrictedEnvironment;

impl LocationEnvironment for UnrestrictedEnvironment {
    fn permission_granted(&self) -> bool {
        true
    }

    fn services_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(lat: f64, lon: f64) -> Position {
        Position {
            latitude: lat,
            longitude: lon,
            accuracy: None,
            altitude: None,
            speed: None,
            timestamp: Utc::now(),
            fix: FixQuality::Accurate,
        }
    }

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = position(63.43, 10.39);
        assert!(p.distance_to(&p) < f64::EPSILON);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let a = position(0.0, 0.0);
        let b = position(1.0, 0.0);
        let d = a.distance_to(&b);
        // One degree of latitude is roughly 111 km.
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = position(59.91, 10.75);
        let b = position(59.92, 10.76);
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, specta::Type)]
/// A single position fix as reported by the platform's location API
pub struct Position {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Radius of uncertainty in metres, negative when the fix is invalid
    pub horizontal_accuracy: f64,
    /// Altitude in metres, if the platform could determine it
    #[serde(default)]
    pub altitude: Option<f64>,
    /// When the fix was taken
    pub timestamp: UtcDT,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            horizontal_accuracy,
            altitude: None,
            timestamp: Utc::now(),
        }
    }

    /// A negative accuracy means the platform couldn't produce a usable fix
    pub fn is_valid(&self) -> bool {
        self.horizontal_accuracy >= 0.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.6}, {:.6}) ±{:.1}m",
            self.latitude, self.longitude, self.horizontal_accuracy
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, specta::Type)]
/// Why a location request didn't produce a position
pub enum LocationFailure {
    /// The platform reported an update with no positions in it
    NoLocation,
    /// The platform failed the request outright
    UnableToDetermine,
    /// The user hasn't answered the permission prompt yet
    Undecided,
    /// Location access is blocked by system policy (parental controls etc.)
    Restricted,
    /// The user denied location access for this app
    Denied,
    /// Location services are turned off for the whole device
    ServicesDisabled,
}

impl fmt::Display for LocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoLocation => "no location obtained",
            Self::UnableToDetermine => "unable to determine location",
            Self::Undecided => "user has not decided",
            Self::Restricted => "restricted by system policy",
            Self::Denied => "user explicitly denied",
            Self::ServicesDisabled => "location services disabled",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for LocationFailure {}

/// Outcome of a single location request, delivered exactly once per request
pub type LocationResult = Result<Position, LocationFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_accuracy_is_invalid() {
        assert!(!Position::new(1.0, 2.0, -1.0).is_valid());
        assert!(Position::new(1.0, 2.0, 0.0).is_valid());
    }

    #[test]
    fn failure_messages() {
        assert_eq!(LocationFailure::NoLocation.to_string(), "no location obtained");
        assert_eq!(
            LocationFailure::ServicesDisabled.to_string(),
            "location services disabled"
        );
    }
}

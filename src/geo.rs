use std::time::Duration;

use thiserror::Error;

use crate::structs::Position;

const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DECLINE_LOCATION: &str = "Don't share";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeolocationError {
    #[error("You denied the request for geolocation")]
    PermissionDenied,
    #[error("Location information is unavailable")]
    PositionUnavailable,
    #[error("The request to get user location timed out")]
    Timeout,
    #[error("An unknown error occurred")]
    Unknown,
}

/// What the chat sent back after being asked for its location.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationReply {
    Shared { lat: f64, lon: f64 },
    Text(String),
    Other,
}

/// Turns a reply into a position or one of the four geolocation failures.
pub fn locate(reply: &LocationReply, waited: Duration, timeout: Duration) -> Result<Position, GeolocationError> {
    if waited > timeout {
        return Err(GeolocationError::Timeout);
    }
    match reply {
        LocationReply::Shared { lat, lon } => {
            if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
                return Err(GeolocationError::Unknown);
            }
            Ok(Position { lat: *lat, lon: *lon })
        }
        LocationReply::Text(text) if text.trim() == DECLINE_LOCATION => Err(GeolocationError::PermissionDenied),
        LocationReply::Text(_) | LocationReply::Other => Err(GeolocationError::PositionUnavailable),
    }
}

/// Great-circle distance in kilometres.
pub fn distance_km(a: Position, b: Position) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn shared_location_is_accepted() {
        let reply = LocationReply::Shared { lat: 13.08, lon: 80.27 };
        assert_eq!(locate(&reply, Duration::ZERO, MINUTE), Ok(Position { lat: 13.08, lon: 80.27 }));
    }

    #[test]
    fn failures_map_to_categories() {
        assert_eq!(
            locate(&LocationReply::Text(DECLINE_LOCATION.into()), Duration::ZERO, MINUTE),
            Err(GeolocationError::PermissionDenied)
        );
        assert_eq!(
            locate(&LocationReply::Text("here".into()), Duration::ZERO, MINUTE),
            Err(GeolocationError::PositionUnavailable)
        );
        assert_eq!(
            locate(&LocationReply::Shared { lat: 1.0, lon: 1.0 }, MINUTE * 2, MINUTE),
            Err(GeolocationError::Timeout)
        );
        assert_eq!(
            locate(&LocationReply::Shared { lat: 91.0, lon: 0.0 }, Duration::ZERO, MINUTE),
            Err(GeolocationError::Unknown)
        );
    }

    #[test]
    fn distance_between_ennore_and_central() {
        let ennore = Position { lat: 13.2176, lon: 80.3061 };
        let central = Position { lat: 13.0827, lon: 80.2707 };
        let d = distance_km(ennore, central);
        assert!((d - 15.5).abs() < 0.5, "{}", d);
        assert_eq!(distance_km(central, central), 0.0);
    }
}

//! Core types for the location subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A point on the globe in decimal degrees.
///
/// Only obtainable through [`Coordinate::new`], so latitude is always within
/// -90..=90 and longitude within -180..=180.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, LocationError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(LocationError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.lat >= 0.0 { 'N' } else { 'S' };
        let ew = if self.lon >= 0.0 { 'E' } else { 'W' };
        write!(f, "{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", self.lat.abs(), ns, self.lon.abs(), ew)
    }
}

/// Which provider produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gpsd,
    Ip,
    Manual,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpsd => write!(f, "gpsd"),
            Self::Ip => write!(f, "ip"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A single fix from a location provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReading {
    pub coordinate: Coordinate,
    /// Horizontal error radius in meters, never negative.
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
    pub source: LocationSource,
}

impl LocationReading {
    /// Build a reading stamped with the current time.
    pub fn now(coordinate: Coordinate, accuracy_m: f64, source: LocationSource) -> Self {
        Self {
            coordinate,
            accuracy_m: accuracy_m.max(0.0),
            timestamp: Utc::now(),
            source,
        }
    }
}

/// The nearest district to a reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictMatch {
    pub district: String,
    pub district_coordinate: Coordinate,
    pub distance_km: f64,
    pub reading: LocationReading,
}

impl DistrictMatch {
    pub fn display_line(&self) -> String {
        format!(
            "\u{1F4CD} {} ({:.1} km)\n  \u{1F4E1} {} fix at {}, \u{00B1}{:.0} m",
            self.district,
            self.distance_km,
            self.reading.source,
            self.reading.coordinate,
            self.reading.accuracy_m,
        )
    }
}

/// Why a location provider could not produce a reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    /// The capability is absent in this environment.
    #[error("location service unavailable: {0}")]
    Unsupported(String),
    #[error("location permission denied: {0}")]
    PermissionDenied(String),
    #[error("location request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The service answered but never produced a usable fix.
    #[error("no position fix available")]
    NoFix,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("invalid coordinates {lat}, {lon} (lat -90..90, lon -180..180)")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

impl LocationError {
    /// Short machine-readable tag for the failure.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Timeout(_) => "timeout",
            Self::NoFix => "no_fix",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidCoordinate { .. } => "invalid_coordinate",
        }
    }
}

/// Nearest-district resolution errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("could not detect location: {0}")]
    NoLocationAvailable(#[from] LocationError),
    #[error("no districts to compare against")]
    EmptyRegistry,
    #[error("location accuracy {accuracy_m:.0} m exceeds limit of {limit_m:.0} m")]
    InaccurateReading { accuracy_m: f64, limit_m: f64 },
}

impl ResolveError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoLocationAvailable(e) => e.reason(),
            Self::EmptyRegistry => "empty_registry",
            Self::InaccurateReading { .. } => "inaccurate",
        }
    }
}

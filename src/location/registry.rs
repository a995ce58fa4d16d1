//! District reference points: the built-in Malaysian set and data-file overrides.

use super::distance::distance_km;
use super::types::{Coordinate, LocationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ─── Built-in dataset ───────────────────────────────────────────

struct BuiltinDistrict {
    name: &'static str,
    lat: f64,
    lon: f64,
}

/// Approximate city centers. Order is the tie-break order.
const BUILTIN_DISTRICTS: &[BuiltinDistrict] = &[
    BuiltinDistrict { name: "Kuala Lumpur", lat: 3.139, lon: 101.6869 },
    BuiltinDistrict { name: "Petaling Jaya", lat: 3.1073, lon: 101.6067 },
    BuiltinDistrict { name: "Shah Alam", lat: 3.0733, lon: 101.5185 },
    BuiltinDistrict { name: "Subang Jaya", lat: 3.0436, lon: 101.5874 },
    BuiltinDistrict { name: "Klang", lat: 3.0454, lon: 101.4450 },
    BuiltinDistrict { name: "Johor Bahru", lat: 1.4927, lon: 103.7414 },
    BuiltinDistrict { name: "Penang", lat: 5.4141, lon: 100.3288 },
    BuiltinDistrict { name: "Ipoh", lat: 4.5975, lon: 101.0901 },
    BuiltinDistrict { name: "Kota Kinabalu", lat: 5.9804, lon: 116.0735 },
    BuiltinDistrict { name: "Kuching", lat: 1.5535, lon: 110.3593 },
];

/// A named district and its reference coordinate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictEntry {
    pub name: String,
    pub coordinate: Coordinate,
}

/// Errors from building or loading a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read district file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed district file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate district name '{0}'")]
    DuplicateName(String),
    #[error("district '{name}': {source}")]
    InvalidCoordinate {
        name: String,
        #[source]
        source: LocationError,
    },
}

/// On-disk shape of one district record.
#[derive(Deserialize)]
struct DistrictRecord {
    name: String,
    lat: f64,
    lon: f64,
}

/// Read-only, ordered set of districts with unique names.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictRegistry {
    entries: Vec<DistrictEntry>,
}

impl DistrictRegistry {
    /// The ten compiled-in Malaysian districts.
    pub fn builtin() -> Self {
        let entries = BUILTIN_DISTRICTS
            .iter()
            .filter_map(|d| {
                Coordinate::new(d.lat, d.lon).ok().map(|coordinate| DistrictEntry {
                    name: d.name.to_string(),
                    coordinate,
                })
            })
            .collect();
        Self { entries }
    }

    /// Build from explicit entries, rejecting case-insensitive duplicate names.
    pub fn from_entries(entries: Vec<DistrictEntry>) -> Result<Self, RegistryError> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.name.eq_ignore_ascii_case(&entry.name)) {
                return Err(RegistryError::DuplicateName(entry.name.clone()));
            }
        }
        Ok(Self { entries })
    }

    /// Load a JSON array of `{ "name", "lat", "lon" }` records.
    pub fn load_from(path: &Path) -> Result<Self, RegistryError> {
        let data = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, RegistryError> {
        let records: Vec<DistrictRecord> = serde_json::from_str(data)?;
        let entries = records
            .into_iter()
            .map(|r| {
                let coordinate = Coordinate::new(r.lat, r.lon)
                    .map_err(|source| RegistryError::InvalidCoordinate { name: r.name.clone(), source })?;
                Ok(DistrictEntry { name: r.name, coordinate })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;
        Self::from_entries(entries)
    }

    pub fn entries(&self) -> &[DistrictEntry] {
        &self.entries
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<&DistrictEntry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closest entry and its distance. Ties keep the earlier entry.
    pub fn nearest(&self, point: Coordinate) -> Option<(&DistrictEntry, f64)> {
        let mut best: Option<(&DistrictEntry, f64)> = None;
        for entry in &self.entries {
            let d = distance_km(point, entry.coordinate);
            match best {
                Some((_, min)) if d >= min => {}
                _ => best = Some((entry, d)),
            }
        }
        best
    }
}

impl Default for DistrictRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A district entry for the public district list API.
#[derive(Debug, Clone, Serialize)]
pub struct DistrictInfo {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl DistrictRegistry {
    pub fn district_list(&self) -> Vec<DistrictInfo> {
        self.entries
            .iter()
            .map(|e| DistrictInfo {
                name: e.name.clone(),
                lat: e.coordinate.lat(),
                lon: e.coordinate.lon(),
            })
            .collect()
    }
}

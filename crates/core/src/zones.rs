//! Monitored zone layout.
//!
//! Loaded once at startup and shared read-only afterwards. A malformed or
//! missing layout never aborts startup; the built-in layout is used instead.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DecodeError, DecodeResult};

/// Planar position of a zone (same unit as the distance decay length).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(c: Coordinate) -> Self {
        [c.x, c.y]
    }
}

const BUILTIN_ZONES: [(&str, Coordinate); 4] = [
    ("areaA", Coordinate::new(0.0, 0.0)),
    ("areaB", Coordinate::new(3.0, 2.0)),
    ("areaC", Coordinate::new(6.0, 1.0)),
    ("areaD", Coordinate::new(-2.0, 4.0)),
];

/// Zone id → coordinate, iterated in zone-id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneCoordinateMap {
    zones: BTreeMap<String, Coordinate>,
}

impl ZoneCoordinateMap {
    pub fn new(zones: impl IntoIterator<Item = (impl Into<String>, Coordinate)>) -> Self {
        Self {
            zones: zones.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Layout used when no valid external layout is supplied.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_ZONES)
    }

    /// Parse `{ "zone": [x, y], ... }`.
    pub fn from_json_str(raw: &str) -> DecodeResult<Self> {
        let map: Self = serde_json::from_str(raw)?;
        map.validate()?;
        Ok(map)
    }

    pub fn from_path(path: impl AsRef<Path>) -> DecodeResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Keep a successfully loaded layout, otherwise log and fall back to [`Self::builtin`].
    pub fn or_builtin(loaded: DecodeResult<Self>) -> Self {
        match loaded {
            Ok(map) => {
                info!(zones = map.len(), "zone layout loaded");
                map
            }
            Err(e) => {
                warn!(error = %e, "zone layout unusable; using built-in layout");
                Self::builtin()
            }
        }
    }

    /// Parse an optional inline layout, falling back to the built-in one.
    pub fn parse_or_builtin(raw: Option<&str>) -> Self {
        match raw {
            Some(raw) => Self::or_builtin(Self::from_json_str(raw)),
            None => {
                info!("no zone layout supplied; using built-in layout");
                Self::builtin()
            }
        }
    }

    pub fn get(&self, zone: &str) -> Option<Coordinate> {
        self.zones.get(zone).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Coordinate)> {
        self.zones.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    fn validate(&self) -> DecodeResult<()> {
        if self.zones.is_empty() {
            return Err(DecodeError::validation("zone layout is empty"));
        }
        if let Some((zone, _)) = self.zones.iter().find(|(_, c)| !c.is_finite()) {
            return Err(DecodeError::validation(format!(
                "zone {zone} has a non-finite coordinate"
            )));
        }
        Ok(())
    }
}

impl Default for ZoneCoordinateMap {
    fn default() -> Self {
        Self::builtin()
    }
}

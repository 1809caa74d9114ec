//! Candidate fire event as produced by the edge stations.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::trace::{stage, Trace};

/// A suspicious frame reported by a regional station, with the wind conditions
/// observed at capture time.
///
/// Immutable once decoded, except for the trace which stages append to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FireEventWire")]
pub struct FireEvent {
    region: String,
    area: String,
    trace: Trace,
    conf_fire: f64,
    conf_smoke: f64,
    wind_speed: f64,
    /// Compass degrees, normalized into `[0, 360)`.
    wind_direction: f64,
    #[serde(rename = "frame_jpeg_b64")]
    frame: String,
}

/// Payload shape accepted on the bus before validation.
#[derive(Debug, Deserialize)]
struct FireEventWire {
    region: String,
    area: String,
    #[serde(default)]
    trace: Option<Trace>,
    /// Capture time in Unix seconds, sent by older stations.
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    conf_fire: f64,
    #[serde(default)]
    conf_smoke: f64,
    wind_speed: f64,
    wind_direction: f64,
    #[serde(alias = "frame")]
    frame_jpeg_b64: String,
}

impl TryFrom<FireEventWire> for FireEvent {
    type Error = DecodeError;

    fn try_from(wire: FireEventWire) -> Result<Self, Self::Error> {
        let mut trace = wire.trace.unwrap_or_else(Trace::generate);
        if let Some(secs) = wire.timestamp.filter(|s| s.is_finite() && *s >= 0.0) {
            trace.record_at(stage::IOT_CAPTURE, (secs * 1e9) as i64);
        }

        FireEvent::new(
            wire.region,
            wire.area,
            trace,
            wire.wind_speed,
            wire.wind_direction,
            wire.frame_jpeg_b64,
        )
        .map(|ev| ev.with_confidence(wire.conf_fire, wire.conf_smoke))
    }
}

impl FireEvent {
    /// Build a validated event. Confidences default to zero.
    pub fn new(
        region: impl Into<String>,
        area: impl Into<String>,
        trace: Trace,
        wind_speed: f64,
        wind_direction: f64,
        frame: impl Into<String>,
    ) -> DecodeResult<Self> {
        let area = area.into();
        if area.trim().is_empty() {
            return Err(DecodeError::validation("area must not be empty"));
        }
        if !wind_speed.is_finite() || wind_speed < 0.0 {
            return Err(DecodeError::validation(format!(
                "wind_speed must be a finite non-negative number (got {wind_speed})"
            )));
        }
        if !wind_direction.is_finite() {
            return Err(DecodeError::validation(format!(
                "wind_direction must be finite (got {wind_direction})"
            )));
        }

        Ok(Self {
            region: region.into(),
            area,
            trace,
            conf_fire: 0.0,
            conf_smoke: 0.0,
            wind_speed,
            wind_direction: wind_direction.rem_euclid(360.0),
            frame: frame.into(),
        })
    }

    pub fn with_confidence(mut self, conf_fire: f64, conf_smoke: f64) -> Self {
        self.conf_fire = conf_fire;
        self.conf_smoke = conf_smoke;
        self
    }

    /// Decode a bus payload.
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut Trace {
        &mut self.trace
    }

    pub fn conf_fire(&self) -> f64 {
        self.conf_fire
    }

    pub fn conf_smoke(&self) -> f64 {
        self.conf_smoke
    }

    pub fn wind_speed(&self) -> f64 {
        self.wind_speed
    }

    pub fn wind_direction(&self) -> f64 {
        self.wind_direction
    }

    /// Base64-encoded JPEG frame, passed through to inference untouched.
    pub fn frame(&self) -> &str {
        &self.frame
    }
}

//! Downwind risk propagation.
//!
//! Model, for a confirmed fire in zone F and every other zone Z:
//! - wind unit vector `w = (sin θ, cos θ)` for compass bearing θ
//! - displacement `d = Z - F`; Z is downwind iff `d · w > 0` (strict)
//! - `urgency = min(1, speed/25) · exp(-|d|/5) · exp(-age/60)`

use std::sync::Arc;

use tracing::{debug, info, warn};

use firewatch_core::{now_nanos, stage, FireEvent, Trace, ZoneCoordinateMap};
use firewatch_events::{Actor, Addr, Context};

use super::alert::SendAlert;

/// Wind speed (m/s) at which the wind factor saturates.
pub const WIND_SATURATION: f64 = 25.0;
/// Distance decay length (zone coordinate units).
pub const DISTANCE_DECAY: f64 = 5.0;
/// Event age decay length (seconds).
pub const AGE_DECAY_SECS: f64 = 60.0;

/// Request to assess a confirmed fire.
#[derive(Debug, Clone)]
pub struct Assess(pub FireEvent);

/// A downwind zone and how urgently it should be warned.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRisk {
    pub zone: String,
    pub distance: f64,
    pub urgency: f64,
}

/// Unit vector the wind blows along, for a compass bearing in degrees.
pub fn wind_vector(direction_deg: f64) -> (f64, f64) {
    let rad = direction_deg.to_radians();
    (rad.sin(), rad.cos())
}

pub fn wind_factor(wind_speed: f64) -> f64 {
    (wind_speed / WIND_SATURATION).min(1.0)
}

pub fn distance_factor(distance: f64) -> f64 {
    (-distance / DISTANCE_DECAY).exp()
}

pub fn time_factor(age_secs: f64) -> f64 {
    (-age_secs / AGE_DECAY_SECS).exp()
}

pub fn urgency(wind_speed: f64, distance: f64, age_secs: f64) -> f64 {
    wind_factor(wind_speed) * distance_factor(distance) * time_factor(age_secs)
}

/// Seconds since the frame was captured; zero when unknown or in the future.
pub fn event_age_secs(trace: &Trace, now: i64) -> f64 {
    match trace.get(stage::IOT_CAPTURE) {
        Some(captured) => (now.saturating_sub(captured) as f64 / 1e9).max(0.0),
        None => 0.0,
    }
}

/// Zones downwind of `fire_zone`, most urgent first.
///
/// Returns `None` when `fire_zone` is not part of the layout.
pub fn assess_downwind(
    fire_zone: &str,
    wind_speed: f64,
    wind_direction: f64,
    age_secs: f64,
    zones: &ZoneCoordinateMap,
) -> Option<Vec<ZoneRisk>> {
    let origin = zones.get(fire_zone)?;
    let (wx, wy) = wind_vector(wind_direction);

    let mut risks: Vec<ZoneRisk> = zones
        .iter()
        .filter(|(zone, _)| *zone != fire_zone)
        .filter_map(|(zone, target)| {
            let dx = target.x - origin.x;
            let dy = target.y - origin.y;
            if dx * wx + dy * wy <= 0.0 {
                return None;
            }
            let distance = dx.hypot(dy);
            Some(ZoneRisk {
                zone: zone.to_string(),
                distance,
                urgency: urgency(wind_speed, distance, age_secs),
            })
        })
        .collect();

    risks.sort_by(|a, b| b.urgency.total_cmp(&a.urgency));
    Some(risks)
}

/// Fans a confirmed fire out into one alert per downwind zone.
pub struct RiskPropagation {
    zones: Arc<ZoneCoordinateMap>,
    alerts: Addr<SendAlert>,
}

impl RiskPropagation {
    pub fn new(zones: Arc<ZoneCoordinateMap>, alerts: Addr<SendAlert>) -> Self {
        Self { zones, alerts }
    }

    fn on_assess(&self, event: FireEvent) {
        let age = event_age_secs(event.trace(), now_nanos());
        let Some(risks) = assess_downwind(
            event.area(),
            event.wind_speed(),
            event.wind_direction(),
            age,
            &self.zones,
        ) else {
            debug!(zone = event.area(), trace_id = %event.trace().trace_id(), "fire zone not in layout; nothing to propagate");
            return;
        };

        info!(
            zone = event.area(),
            trace_id = %event.trace().trace_id(),
            downwind = risks.len(),
            "risk assessed"
        );

        for risk in risks {
            let alert = SendAlert {
                text: format!("Fire near {} urgency={:.3}", event.area(), risk.urgency),
                zone: risk.zone,
                trace: event.trace().clone(),
            };
            if let Err(e) = self.alerts.tell(alert) {
                warn!(error = %e, trace_id = %event.trace().trace_id(), "propagated alert dropped");
            }
        }
    }
}

impl Actor for RiskPropagation {
    type Msg = Assess;

    fn handle(&mut self, Assess(event): Assess, _ctx: &Context<Assess>) {
        self.on_assess(event);
    }
}

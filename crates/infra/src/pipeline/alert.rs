//! Outbound alert publishing.

use serde::Serialize;
use tracing::{info, warn};

use firewatch_core::{stage, Trace};
use firewatch_events::{Actor, BusConnection, Context};

/// Request to warn one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct SendAlert {
    pub zone: String,
    pub text: String,
    pub trace: Trace,
}

/// Wire payload published on `alerts.<zone>`.
#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    text: &'a str,
    trace: &'a Trace,
}

pub fn alert_topic(zone: &str) -> String {
    format!("alerts.{zone}")
}

/// Publishes alerts over a connection it owns for its whole lifetime.
pub struct AlertDispatch<C: BusConnection> {
    connection: Option<C>,
}

impl<C: BusConnection> AlertDispatch<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    fn on_send_alert(&mut self, mut alert: SendAlert) {
        let Some(conn) = self.connection.as_mut() else {
            warn!(zone = %alert.zone, "alert dropped; connection already released");
            return;
        };

        alert.trace.record(stage::ALERT_PUBLISHED);
        let topic = alert_topic(&alert.zone);

        let payload = match serde_json::to_vec(&AlertPayload {
            text: &alert.text,
            trace: &alert.trace,
        }) {
            Ok(p) => p,
            Err(e) => {
                warn!(zone = %alert.zone, error = %e, "alert serialization failed; dropped");
                return;
            }
        };

        match conn.publish(&topic, &payload) {
            Ok(()) => info!(
                zone = %alert.zone,
                trace_id = %alert.trace.trace_id(),
                text = %alert.text,
                "alert published"
            ),
            Err(e) => warn!(
                zone = %alert.zone,
                trace_id = %alert.trace.trace_id(),
                error = %e,
                "alert publish failed; dropped"
            ),
        }
    }
}

impl<C: BusConnection> Actor for AlertDispatch<C> {
    type Msg = SendAlert;

    fn handle(&mut self, msg: SendAlert, _ctx: &Context<SendAlert>) {
        self.on_send_alert(msg);
    }

    fn stopped(&mut self) {
        if let Some(conn) = self.connection.take() {
            match conn.close() {
                Ok(()) => info!("bus connection closed (alert dispatch)"),
                Err(e) => warn!(error = %e, "error closing bus connection (alert dispatch)"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use firewatch_core::TraceId;
    use firewatch_events::{InMemoryBus, MessageBus};
    use serde_json::Value;

    use super::*;

    fn alert(zone: &str) -> SendAlert {
        SendAlert {
            zone: zone.to_string(),
            text: "Fire detected in areaA confidence=0.910".to_string(),
            trace: Trace::new(TraceId::new("t-1")).with_stage(stage::IOT_CAPTURE, 7),
        }
    }

    #[test]
    fn publishes_text_and_trace_on_zone_topic() {
        let bus = InMemoryBus::new();
        let mut dispatch = AlertDispatch::new(bus.connect().unwrap());

        dispatch.on_send_alert(alert("areaA"));

        let published = bus.published_on("alerts.areaA");
        assert_eq!(published.len(), 1);
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["text"], "Fire detected in areaA confidence=0.910");
        assert_eq!(body["trace"]["trace_id"], "t-1");
        assert_eq!(body["trace"]["timestamps"]["iot_capture"], 7);
        assert!(body["trace"]["timestamps"]["alert_published"].is_i64());
    }

    #[test]
    fn publish_failure_is_absorbed() {
        let bus = InMemoryBus::new();
        let mut dispatch = AlertDispatch::new(bus.connect().unwrap());

        bus.reject_publishes(true);
        dispatch.on_send_alert(alert("areaA"));
        // Invalid topic (wildcard in zone id) is also just dropped.
        bus.reject_publishes(false);
        dispatch.on_send_alert(alert("*"));
        dispatch.on_send_alert(alert("areaB"));

        let topics: Vec<String> = bus.published().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["alerts.areaB".to_string()]);
    }

    #[test]
    fn stop_releases_connection() {
        let bus = InMemoryBus::new();
        let mut dispatch = AlertDispatch::new(bus.connect().unwrap());
        assert_eq!(bus.open_connections(), 1);

        dispatch.stopped();
        assert_eq!(bus.open_connections(), 0);

        dispatch.on_send_alert(alert("areaA"));
        assert!(bus.published().is_empty());
    }
}

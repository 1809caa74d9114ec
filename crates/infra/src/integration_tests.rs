//! Integration tests for the full pipeline.
//!
//! Tests: bus → Ingest → Analysis (inference) → Risk → Alerts → bus
//!
//! Verifies:
//! - Confirmed fires alert the source zone and every downwind zone exactly once
//! - Unconfirmed, failed or malformed events produce no alerts
//! - Startup is fail-fast and shutdown releases every bus connection

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};

    use firewatch_core::{now_nanos, stage, Coordinate, ZoneCoordinateMap};
    use firewatch_events::{BusConnection, InMemoryBus, InMemoryConnection, MailboxConfig, MessageBus};

    use crate::inference::{InferenceError, StaticInferenceClient};
    use crate::pipeline::{Pipeline, PipelineConfig, StartupError};

    struct Setup {
        bus: InMemoryBus,
        edge: InMemoryConnection,
        pipeline: Pipeline,
        _rt: tokio::runtime::Runtime,
    }

    fn zones() -> Arc<ZoneCoordinateMap> {
        Arc::new(ZoneCoordinateMap::new([
            ("A", Coordinate::new(0.0, 0.0)),
            ("B", Coordinate::new(3.0, 2.0)),
            ("C", Coordinate::new(6.0, 1.0)),
        ]))
    }

    fn setup(client: StaticInferenceClient) -> Setup {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let bus = InMemoryBus::new();
        let pipeline = Pipeline::start(
            &bus,
            Arc::new(client),
            zones(),
            rt.handle().clone(),
            PipelineConfig::default(),
        )
        .unwrap();
        let edge = bus.connect().unwrap();
        Setup {
            bus,
            edge,
            pipeline,
            _rt: rt,
        }
    }

    fn fire_event(area: &str, frame: &str, wind_direction: f64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "region": "north",
            "area": area,
            "conf_fire": 0.2,
            "conf_smoke": 0.05,
            "wind_speed": 20.0,
            "wind_direction": wind_direction,
            "frame_jpeg_b64": frame,
            "trace": { "trace_id": format!("trace-{frame}"), "timestamps": { "iot_capture": now_nanos() } }
        }))
        .unwrap()
    }

    /// Poll until `n` alerts were published or the deadline passes.
    fn wait_for_alerts(bus: &InMemoryBus, n: usize) -> Vec<(String, Value)> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let alerts: Vec<_> = bus
                .published()
                .into_iter()
                .filter(|m| m.topic.starts_with("alerts."))
                .map(|m| (m.topic, serde_json::from_slice(&m.payload).unwrap()))
                .collect();
            if alerts.len() >= n || Instant::now() >= deadline {
                return alerts;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Give the pipeline time to (not) react.
    fn settle() {
        std::thread::sleep(Duration::from_millis(200));
    }

    #[test]
    fn confirmed_fire_alerts_source_and_downwind_zones() {
        let mut s = setup(StaticInferenceClient::with_fire_probability(0.92));

        s.edge.publish("region.north.processed", &fire_event("A", "f1", 45.0)).unwrap();

        let mut alerts = wait_for_alerts(&s.bus, 3);
        settle();
        assert_eq!(wait_for_alerts(&s.bus, 3).len(), 3, "no extra alerts expected");

        alerts.sort_by(|a, b| a.0.cmp(&b.0));
        let topics: Vec<&str> = alerts.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["alerts.A", "alerts.B", "alerts.C"]);

        assert_eq!(alerts[0].1["text"], "Fire detected in A confidence=0.920");
        assert_eq!(alerts[1].1["text"], "Fire near A urgency=0.389");
        assert_eq!(alerts[2].1["text"], "Fire near A urgency=0.237");

        for (_, body) in &alerts {
            assert_eq!(body["trace"]["trace_id"], "trace-f1");
            let stamps = &body["trace"]["timestamps"];
            for name in [
                stage::IOT_CAPTURE,
                stage::INGEST_RECEIVED,
                stage::INFERENCE_START,
                stage::INFERENCE_END,
                stage::CLOUD_DECISION,
                stage::ALERT_PUBLISHED,
            ] {
                assert!(stamps[name].is_i64(), "missing stage {name}");
            }
        }

        s.pipeline.stop();
    }

    #[test]
    fn unconfirmed_fire_produces_no_alerts() {
        let client = StaticInferenceClient::with_fire_probability(0.70)
            .respond("smoke-only", Err(InferenceError::Transport("connection reset".into())));
        let mut s = setup(client);

        s.edge.publish("region.north.processed", &fire_event("A", "borderline", 45.0)).unwrap();
        s.edge.publish("region.south.processed", &fire_event("B", "smoke-only", 45.0)).unwrap();
        settle();

        assert!(wait_for_alerts(&s.bus, 1).is_empty());
        s.pipeline.stop();
    }

    #[test]
    fn malformed_payload_is_discarded_and_pipeline_keeps_running() {
        let mut s = setup(StaticInferenceClient::with_fire_probability(0.99));

        s.edge.publish("region.north.processed", b"\x00garbage").unwrap();
        s.edge.publish("region.north.processed", br#"{"area":"A"}"#).unwrap();
        // Wind blowing west: nothing downwind, only the source alert.
        s.edge.publish("region.north.processed", &fire_event("A", "ok", 270.0)).unwrap();

        let alerts = wait_for_alerts(&s.bus, 1);
        settle();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "alerts.A");
        s.pipeline.stop();
    }

    #[test]
    fn fire_outside_layout_only_alerts_source_zone() {
        let mut s = setup(StaticInferenceClient::with_fire_probability(0.99));

        s.edge.publish("region.east.processed", &fire_event("Z", "z", 45.0)).unwrap();

        wait_for_alerts(&s.bus, 1);
        settle();
        let topics: Vec<String> = wait_for_alerts(&s.bus, 2).into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec!["alerts.Z".to_string()]);
        s.pipeline.stop();
    }

    #[test]
    fn publish_failures_do_not_stop_the_pipeline() {
        let client = StaticInferenceClient::with_fire_probability(0.99).with_delay(Duration::from_millis(100));
        let mut s = setup(client);

        s.edge.publish("region.north.processed", &fire_event("A", "first", 45.0)).unwrap();
        // Alerts for the first event are produced after inference, while publishing is down.
        s.bus.reject_publishes(true);
        std::thread::sleep(Duration::from_millis(400));
        s.bus.reject_publishes(false);

        s.edge.publish("region.north.processed", &fire_event("A", "second", 270.0)).unwrap();
        let alerts = wait_for_alerts(&s.bus, 1);
        settle();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].1["trace"]["trace_id"], "trace-second");
        s.pipeline.stop();
    }

    #[test]
    fn slow_inference_holds_back_the_bus_instead_of_queueing() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let bus = InMemoryBus::new().with_subscription_capacity(2);
        let client = Arc::new(StaticInferenceClient::with_fire_probability(0.1).with_delay(Duration::from_millis(200)));
        let config = PipelineConfig {
            mailbox: MailboxConfig::default().with_capacity(2),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::start(&bus, client.clone(), zones(), rt.handle().clone(), config).unwrap();

        let publisher = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                let mut edge = bus.connect().unwrap();
                for i in 0..50 {
                    edge.publish("region.north.processed", &fire_event("A", &format!("f{i}"), 45.0))
                        .unwrap();
                }
            })
        };

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(client.calls(), 2);
        assert!(!publisher.is_finished());
        assert!(bus.published().len() < 50);

        pipeline.stop();
        publisher.join().unwrap();
        assert!(client.calls() < 50);
    }

    #[test]
    fn unreachable_bus_fails_startup() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let bus = InMemoryBus::unreachable();
        let result = Pipeline::start(
            &bus,
            Arc::new(StaticInferenceClient::with_fire_probability(1.0)),
            zones(),
            rt.handle().clone(),
            PipelineConfig::default(),
        );
        assert!(matches!(result, Err(StartupError::Bus(_))));
    }

    #[test]
    fn bad_subscription_fails_startup_and_releases_connections() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let bus = InMemoryBus::new();
        let config = PipelineConfig {
            subscription: "region..processed".to_string(),
            ..PipelineConfig::default()
        };
        let result = Pipeline::start(
            &bus,
            Arc::new(StaticInferenceClient::with_fire_probability(1.0)),
            zones(),
            rt.handle().clone(),
            config,
        );
        assert!(matches!(result, Err(StartupError::Bus(_))));
        assert_eq!(bus.open_connections(), 0);
    }

    #[test]
    fn stop_releases_every_connection() {
        let s = setup(StaticInferenceClient::with_fire_probability(0.1));
        assert_eq!(s.bus.open_connections(), 3);

        s.pipeline.stop();
        assert_eq!(s.bus.open_connections(), 1);
        drop(s.edge);
        assert_eq!(s.bus.open_connections(), 0);
    }
}

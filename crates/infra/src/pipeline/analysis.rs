//! Fire confirmation via the inference service.
//!
//! `Analyze` starts the inference call as a task on the async runtime and
//! returns immediately, so the mailbox keeps draining while calls are in
//! flight. A confirmed result comes back as `Confirmed` through the actor's own
//! mailbox; the actor is the only place that touches the event afterwards.
//!
//! Concurrent inference calls are capped at the mailbox capacity. Once the cap
//! is reached, `Block` makes the actor wait for a free slot (which in turn fills
//! its mailbox and holds back ingest), while `DropNewest` discards the event.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use firewatch_core::{now_nanos, stage, FireEvent};
use firewatch_events::{Actor, Addr, Context, MailboxConfig, OverflowPolicy, SendError};

use crate::inference::InferenceClient;

use super::alert::SendAlert;
use super::risk::Assess;

/// Fire probability above which a frame counts as a confirmed fire.
pub const DEFAULT_CONFIRMATION_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone)]
pub enum AnalysisMsg {
    Analyze(FireEvent),
    /// Inference confirmed the fire; instants are Unix-epoch nanoseconds.
    Confirmed {
        event: FireEvent,
        probability: f64,
        inference_start: i64,
        inference_end: i64,
    },
}

impl AnalysisMsg {
    pub fn event(&self) -> &FireEvent {
        match self {
            Self::Analyze(event) | Self::Confirmed { event, .. } => event,
        }
    }
}

/// Confirmation rule (strictly above the threshold).
pub fn is_confirmed(fire_probability: f64, threshold: f64) -> bool {
    fire_probability > threshold
}

pub struct FireAnalysis {
    inference: Arc<dyn InferenceClient>,
    runtime: Handle,
    risk: Addr<Assess>,
    alerts: Addr<SendAlert>,
    threshold: f64,
    inflight: Arc<Semaphore>,
    overflow: OverflowPolicy,
}

impl FireAnalysis {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        runtime: Handle,
        risk: Addr<Assess>,
        alerts: Addr<SendAlert>,
    ) -> Self {
        Self {
            inference,
            runtime,
            risk,
            alerts,
            threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            inflight: Arc::new(Semaphore::new(MailboxConfig::default().capacity)),
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Cap concurrent inference calls at `mailbox.capacity`, applying its overflow policy.
    pub fn with_limits(mut self, mailbox: MailboxConfig) -> Self {
        self.inflight = Arc::new(Semaphore::new(mailbox.capacity.max(1)));
        self.overflow = mailbox.overflow;
        self
    }

    fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        match self.overflow {
            // The actor runs on its own thread, outside the runtime.
            OverflowPolicy::Block => self.runtime.block_on(self.inflight.clone().acquire_owned()).ok(),
            OverflowPolicy::DropNewest => self.inflight.clone().try_acquire_owned().ok(),
        }
    }

    fn on_analyze(&self, event: FireEvent, ctx: &Context<AnalysisMsg>) {
        let Some(me) = ctx.myself() else {
            debug!(zone = event.area(), "analysis shutting down; event dropped");
            return;
        };

        let Some(slot) = self.acquire_slot() else {
            warn!(
                zone = event.area(),
                trace_id = %event.trace().trace_id(),
                "inference capacity exhausted; event dropped"
            );
            return;
        };

        let inference = self.inference.clone();
        let threshold = self.threshold;

        self.runtime.spawn(async move {
            let inference_start = now_nanos();
            let outcome = inference.infer(event.frame()).await;
            let inference_end = now_nanos();
            // The slot covers the model call only.
            drop(slot);

            let result = match outcome {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        zone = event.area(),
                        trace_id = %event.trace().trace_id(),
                        error = %e,
                        "inference failed; treating as not confirmed"
                    );
                    return;
                }
            };

            let probability = result.fire_probability();
            if !is_confirmed(probability, threshold) {
                info!(
                    zone = event.area(),
                    trace_id = %event.trace().trace_id(),
                    probability,
                    "fire not confirmed; event dropped"
                );
                return;
            }

            let confirmed = AnalysisMsg::Confirmed {
                event,
                probability,
                inference_start,
                inference_end,
            };
            let _ = deliver_confirmation(&me, confirmed).await;
        });
    }

    fn on_confirmed(&self, mut event: FireEvent, probability: f64, inference_start: i64, inference_end: i64) {
        let trace = event.trace_mut();
        trace.record_at(stage::INFERENCE_START, inference_start);
        trace.record_at(stage::INFERENCE_END, inference_end);
        trace.record(stage::CLOUD_DECISION);

        info!(
            zone = event.area(),
            trace_id = %event.trace().trace_id(),
            probability,
            "fire confirmed"
        );

        let alert = SendAlert {
            zone: event.area().to_string(),
            text: format!("Fire detected in {} confidence={:.3}", event.area(), probability),
            trace: event.trace().clone(),
        };

        if let Err(e) = self.risk.tell(Assess(event)) {
            warn!(error = %e, "risk assessment request dropped");
        }
        if let Err(e) = self.alerts.tell(alert) {
            warn!(error = %e, "source zone alert dropped");
        }
    }
}

/// Send a confirmation back into the analysis mailbox, logging a loss.
pub async fn deliver_confirmation(me: &Addr<AnalysisMsg>, confirmed: AnalysisMsg) -> Result<(), SendError> {
    let zone = confirmed.event().area().to_string();
    let trace_id = confirmed.event().trace().trace_id().clone();

    let result = me.send(confirmed).await;
    match &result {
        Ok(()) => {}
        Err(e @ SendError::Full(_)) => {
            warn!(zone = %zone, trace_id = %trace_id, error = %e, "confirmed fire dropped; analysis mailbox full");
        }
        Err(e @ SendError::Closed(_)) => {
            debug!(zone = %zone, trace_id = %trace_id, error = %e, "confirmation arrived after shutdown; dropped");
        }
    }
    result
}

impl Actor for FireAnalysis {
    type Msg = AnalysisMsg;

    fn handle(&mut self, msg: AnalysisMsg, ctx: &Context<AnalysisMsg>) {
        match msg {
            AnalysisMsg::Analyze(event) => self.on_analyze(event, ctx),
            AnalysisMsg::Confirmed {
                event,
                probability,
                inference_start,
                inference_end,
            } => self.on_confirmed(event, probability, inference_start, inference_end),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use firewatch_core::Trace;
    use firewatch_events::{probe, spawn, MailboxConfig, Probe};

    use super::*;
    use crate::inference::{InferenceError, StaticInferenceClient};

    const WAIT: Duration = Duration::from_millis(500);
    const QUIET: Duration = Duration::from_millis(100);

    struct Harness {
        _rt: tokio::runtime::Runtime,
        analysis: Addr<AnalysisMsg>,
        handle: firewatch_events::ActorHandle<AnalysisMsg>,
        risk: Probe<Assess>,
        alerts: Probe<SendAlert>,
    }

    fn harness(client: StaticInferenceClient) -> Harness {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (risk_addr, risk) = probe("risk", MailboxConfig::default());
        let (alert_addr, alerts) = probe("alerts", MailboxConfig::default());
        let actor = FireAnalysis::new(Arc::new(client), rt.handle().clone(), risk_addr, alert_addr);
        let (analysis, handle) = spawn("analysis", actor, MailboxConfig::default()).unwrap();
        Harness {
            _rt: rt,
            analysis,
            handle,
            risk,
            alerts,
        }
    }

    fn event(area: &str, frame: &str) -> FireEvent {
        FireEvent::new("north", area, Trace::generate(), 10.0, 90.0, frame).unwrap()
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!is_confirmed(0.70, DEFAULT_CONFIRMATION_THRESHOLD));
        assert!(is_confirmed(0.7000001, DEFAULT_CONFIRMATION_THRESHOLD));
        assert!(!is_confirmed(0.0, DEFAULT_CONFIRMATION_THRESHOLD));
    }

    #[test]
    fn confirmed_fire_yields_one_assess_and_source_alert() {
        let mut h = harness(StaticInferenceClient::with_fire_probability(0.93));
        h.analysis.tell(AnalysisMsg::Analyze(event("areaA", "f1"))).unwrap();

        let Assess(assessed) = h.risk.recv_timeout(WAIT).expect("assess");
        let alert = h.alerts.recv_timeout(WAIT).expect("alert");

        assert_eq!(assessed.area(), "areaA");
        assert_eq!(alert.zone, "areaA");
        assert_eq!(alert.text, "Fire detected in areaA confidence=0.930");
        for s in [stage::INFERENCE_START, stage::INFERENCE_END, stage::CLOUD_DECISION] {
            assert!(alert.trace.get(s).is_some(), "missing {s}");
            assert!(assessed.trace().get(s).is_some(), "missing {s}");
        }
        assert!(alert.trace.get(stage::INFERENCE_START) <= alert.trace.get(stage::INFERENCE_END));

        assert!(h.risk.recv_timeout(QUIET).is_none());
        assert!(h.alerts.recv_timeout(QUIET).is_none());
        h.handle.shutdown();
    }

    #[test]
    fn at_or_below_threshold_produces_nothing() {
        let client = StaticInferenceClient::with_fire_probability(0.70).respond("low", Ok(crate::inference::fire_result(0.2)));
        let mut h = harness(client);
        h.analysis.tell(AnalysisMsg::Analyze(event("areaA", "edge"))).unwrap();
        h.analysis.tell(AnalysisMsg::Analyze(event("areaB", "low"))).unwrap();

        assert!(h.risk.recv_timeout(QUIET).is_none());
        assert!(h.alerts.recv_timeout(QUIET).is_none());
        h.handle.shutdown();
    }

    #[test]
    fn inference_failure_is_absorbed() {
        let client = StaticInferenceClient::new(Err(InferenceError::Status(500)));
        let mut h = harness(client);
        h.analysis.tell(AnalysisMsg::Analyze(event("areaA", "x"))).unwrap();

        assert!(h.risk.recv_timeout(QUIET).is_none());
        assert!(h.alerts.recv_timeout(QUIET).is_none());
        h.handle.shutdown();
    }

    #[test]
    fn mailbox_keeps_draining_while_inference_is_slow() {
        let client = StaticInferenceClient::with_fire_probability(0.1)
            .respond("fast", Ok(crate::inference::fire_result(0.95)))
            .with_delay(Duration::from_millis(300));
        let client = Arc::new(client);

        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let (risk_addr, mut risk) = probe("risk", MailboxConfig::default());
        let (alert_addr, _alerts) = probe("alerts", MailboxConfig::default());
        let actor = FireAnalysis::new(client.clone(), rt.handle().clone(), risk_addr, alert_addr);
        let (analysis, handle) = spawn("analysis", actor, MailboxConfig::default()).unwrap();

        for i in 0..5 {
            analysis.tell(AnalysisMsg::Analyze(event("areaA", &format!("slow-{i}")))).unwrap();
        }
        analysis.tell(AnalysisMsg::Analyze(event("areaC", "fast"))).unwrap();

        // All six calls start concurrently instead of one after another.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(client.calls(), 6);

        let Assess(ev) = risk.recv_timeout(Duration::from_secs(2)).expect("assess");
        assert_eq!(ev.area(), "areaC");
        handle.shutdown();
    }

    #[test]
    fn confirmed_message_is_handled_on_the_actor() {
        let mut h = harness(StaticInferenceClient::with_fire_probability(0.0));
        h.analysis
            .tell(AnalysisMsg::Confirmed {
                event: event("areaD", "x"),
                probability: 0.8,
                inference_start: 10,
                inference_end: 20,
            })
            .unwrap();

        let alert = h.alerts.recv_timeout(WAIT).expect("alert");
        assert_eq!(alert.trace.get(stage::INFERENCE_START), Some(10));
        assert_eq!(alert.trace.get(stage::INFERENCE_END), Some(20));
        assert!(h.risk.recv_timeout(WAIT).is_some());
        h.handle.shutdown();
    }

    #[test]
    fn inflight_inference_is_capped_when_blocking() {
        let limits = MailboxConfig::default().with_capacity(2);
        let client = Arc::new(StaticInferenceClient::with_fire_probability(0.1).with_delay(Duration::from_millis(300)));

        let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();
        let (risk_addr, _risk) = probe("risk", MailboxConfig::default());
        let (alert_addr, _alerts) = probe("alerts", MailboxConfig::default());
        let actor = FireAnalysis::new(client.clone(), rt.handle().clone(), risk_addr, alert_addr).with_limits(limits);
        let (analysis, handle) = spawn("analysis", actor, MailboxConfig::default()).unwrap();

        for i in 0..6 {
            analysis.tell(AnalysisMsg::Analyze(event("areaA", &format!("f-{i}")))).unwrap();
        }

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(client.calls(), 2);

        // Waiting events are not lost; they run as slots free up.
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while client.calls() < 6 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(client.calls(), 6);
        handle.shutdown();
    }

    #[test]
    fn drop_newest_sheds_events_beyond_capacity() {
        let limits = MailboxConfig::default()
            .with_capacity(2)
            .with_overflow(OverflowPolicy::DropNewest);
        let client = Arc::new(StaticInferenceClient::with_fire_probability(0.1).with_delay(Duration::from_millis(300)));

        let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();
        let (risk_addr, _risk) = probe("risk", MailboxConfig::default());
        let (alert_addr, _alerts) = probe("alerts", MailboxConfig::default());
        let actor = FireAnalysis::new(client.clone(), rt.handle().clone(), risk_addr, alert_addr).with_limits(limits);
        let (analysis, handle) = spawn("analysis", actor, MailboxConfig::default()).unwrap();

        for i in 0..5 {
            analysis.tell(AnalysisMsg::Analyze(event("areaA", &format!("f-{i}")))).unwrap();
        }

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(client.calls(), 2);
        handle.shutdown();
    }

    #[test]
    fn full_mailbox_reports_lost_confirmation() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let config = MailboxConfig::default()
            .with_capacity(1)
            .with_overflow(OverflowPolicy::DropNewest);
        let (addr, mut tap) = probe::<AnalysisMsg>("analysis", config);
        addr.tell(AnalysisMsg::Analyze(event("areaA", "queued"))).unwrap();

        let confirmed = AnalysisMsg::Confirmed {
            event: event("areaB", "lost"),
            probability: 0.9,
            inference_start: 1,
            inference_end: 2,
        };
        let result = rt.block_on(deliver_confirmation(&addr, confirmed));
        assert_eq!(result, Err(SendError::Full("analysis")));

        assert_eq!(tap.drain().len(), 1);
        let confirmed = AnalysisMsg::Confirmed {
            event: event("areaB", "kept"),
            probability: 0.9,
            inference_start: 1,
            inference_end: 2,
        };
        assert_eq!(rt.block_on(deliver_confirmation(&addr, confirmed)), Ok(()));
    }
}

//! The fire escalation pipeline.
//!
//! ```text
//! bus ─▶ ingest ─▶ analysis ─┬──────────────▶ alerts ─▶ bus
//!                            └─▶ risk ───────▶ alerts
//! ```
//!
//! Every stage runs on its own thread and owns its mailbox; stages only talk by
//! sending messages. Startup is fail-fast: if any bus connection or the
//! subscription cannot be established, whatever was already started is stopped
//! and the error returned. At steady state every failure is logged and the
//! message in flight dropped.

pub mod alert;
pub mod analysis;
pub mod ingest;
pub mod risk;

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::info;

use firewatch_core::ZoneCoordinateMap;
use firewatch_events::{spawn, ActorHandle, BusError, MailboxConfig, MessageBus};

use crate::inference::InferenceClient;

pub use alert::{alert_topic, AlertDispatch, SendAlert};
pub use analysis::{deliver_confirmation, is_confirmed, AnalysisMsg, FireAnalysis, DEFAULT_CONFIRMATION_THRESHOLD};
pub use ingest::{IngestAdapter, WorkerHandle, PROCESSED_EVENTS};
pub use risk::{assess_downwind, Assess, RiskPropagation, ZoneRisk};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("bus setup failed: {0}")]
    Bus(#[from] BusError),

    #[error("failed to spawn {component} thread: {source}")]
    Spawn {
        component: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pattern the ingest adapter subscribes to.
    pub subscription: String,
    pub confirmation_threshold: f64,
    pub mailbox: MailboxConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subscription: PROCESSED_EVENTS.to_string(),
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            mailbox: MailboxConfig::default(),
        }
    }
}

/// Running pipeline; stop it with [`Pipeline::stop`].
#[derive(Debug)]
pub struct Pipeline {
    ingest: WorkerHandle,
    analysis: ActorHandle<AnalysisMsg>,
    risk: ActorHandle<Assess>,
    alerts: ActorHandle<SendAlert>,
}

impl Pipeline {
    /// Wire and start all four stages, downstream first.
    ///
    /// `runtime` hosts the inference calls; it must outlive the pipeline.
    pub fn start<B: MessageBus>(
        bus: &B,
        inference: Arc<dyn InferenceClient>,
        zones: Arc<ZoneCoordinateMap>,
        runtime: Handle,
        config: PipelineConfig,
    ) -> Result<Self, StartupError> {
        // Both connections are acquired before anything is spawned.
        let alert_conn = bus.connect()?;
        let ingest_conn = bus.connect()?;

        let (alerts_addr, alerts) = spawn("alert-dispatch", AlertDispatch::new(alert_conn), config.mailbox)
            .map_err(|source| StartupError::Spawn {
                component: "alert-dispatch",
                source,
            })?;

        let (risk_addr, risk) = match spawn(
            "risk-propagation",
            RiskPropagation::new(zones, alerts_addr.clone()),
            config.mailbox,
        ) {
            Ok(started) => started,
            Err(source) => {
                alerts.shutdown();
                return Err(StartupError::Spawn {
                    component: "risk-propagation",
                    source,
                });
            }
        };

        let analysis_actor = FireAnalysis::new(inference, runtime, risk_addr, alerts_addr)
            .with_threshold(config.confirmation_threshold)
            .with_limits(config.mailbox);
        let (analysis_addr, analysis) = match spawn("fire-analysis", analysis_actor, config.mailbox) {
            Ok(started) => started,
            Err(source) => {
                risk.shutdown();
                alerts.shutdown();
                return Err(StartupError::Spawn {
                    component: "fire-analysis",
                    source,
                });
            }
        };

        let ingest = match IngestAdapter::spawn(ingest_conn, &config.subscription, analysis_addr) {
            Ok(handle) => handle,
            Err(e) => {
                analysis.shutdown();
                risk.shutdown();
                alerts.shutdown();
                return Err(e);
            }
        };

        info!(
            subscription = %config.subscription,
            threshold = config.confirmation_threshold,
            mailbox_capacity = config.mailbox.capacity,
            overflow = ?config.mailbox.overflow,
            "pipeline started"
        );

        Ok(Self {
            ingest,
            analysis,
            risk,
            alerts,
        })
    }

    /// Stop upstream-first so each stage drains what is already queued.
    ///
    /// Inference calls still in flight are not cancelled; their results are
    /// discarded once the analysis mailbox is closed.
    pub fn stop(self) {
        self.ingest.shutdown();
        self.analysis.shutdown();
        self.risk.shutdown();
        self.alerts.shutdown();
        info!("pipeline stopped");
    }
}

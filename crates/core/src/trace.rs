//! Per-event correlation record carried end-to-end through the pipeline.

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::TraceId;

/// Well-known stage names recorded on a [`Trace`].
pub mod stage {
    /// Frame captured by the field camera (recorded upstream).
    pub const IOT_CAPTURE: &str = "iot_capture";
    pub const INGEST_RECEIVED: &str = "ingest_received";
    pub const INFERENCE_START: &str = "inference_start";
    pub const INFERENCE_END: &str = "inference_end";
    pub const CLOUD_DECISION: &str = "cloud_decision";
    pub const ALERT_PUBLISHED: &str = "alert_published";
}

/// Current wall-clock instant as Unix-epoch nanoseconds.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Correlation id plus named stage timestamps (Unix-epoch nanoseconds).
///
/// Timestamps are append-only: recording a stage that is already present keeps
/// the first value. Stages serialize in the order they were recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    trace_id: TraceId,
    #[serde(default)]
    timestamps: IndexMap<String, i64>,
}

impl Trace {
    pub fn new(trace_id: TraceId) -> Self {
        Self {
            trace_id,
            timestamps: IndexMap::new(),
        }
    }

    /// Fresh trace with a generated id.
    pub fn generate() -> Self {
        Self::new(TraceId::generate())
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn timestamps(&self) -> &IndexMap<String, i64> {
        &self.timestamps
    }

    pub fn get(&self, stage: &str) -> Option<i64> {
        self.timestamps.get(stage).copied()
    }

    /// Record `stage` at the current instant. Returns `false` if it was already set.
    pub fn record(&mut self, stage: &str) -> bool {
        self.record_at(stage, now_nanos())
    }

    /// Record `stage` at an explicit instant. Returns `false` if it was already set.
    pub fn record_at(&mut self, stage: &str, nanos: i64) -> bool {
        if self.timestamps.contains_key(stage) {
            return false;
        }
        self.timestamps.insert(stage.to_owned(), nanos);
        true
    }

    /// Builder-style variant of [`Trace::record_at`].
    pub fn with_stage(mut self, stage: &str, nanos: i64) -> Self {
        self.record_at(stage, nanos);
        self
    }
}

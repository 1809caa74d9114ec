use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use firewatch_core::{stage, FireEvent};
use firewatch_events::{Addr, BusConnection, BusMessage, Subscription};

use super::analysis::AnalysisMsg;
use super::StartupError;

/// Subscription covering every region's processed events.
pub const PROCESSED_EVENTS: &str = "region.*.processed";

/// Handle to control and join the ingest worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Bus subscriber that decodes processed events and hands them to analysis.
///
/// - Owns its bus connection; released when the worker stops
/// - Malformed payloads are logged and discarded
#[derive(Debug)]
pub struct IngestAdapter;

impl IngestAdapter {
    /// Subscribe on `connection` and spawn the worker thread.
    ///
    /// Subscription failure is returned to the caller (startup is fail-fast).
    pub fn spawn<C: BusConnection>(
        mut connection: C,
        pattern: &str,
        analysis: Addr<AnalysisMsg>,
    ) -> Result<WorkerHandle, StartupError> {
        let sub = connection.subscribe(pattern)?;
        info!(pattern, "subscribed to processed events");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("ingest".to_string())
            .spawn(move || worker_loop(connection, sub, shutdown_rx, analysis))
            .map_err(|source| StartupError::Spawn {
                component: "ingest",
                source,
            })?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Decode one bus payload; `None` (after logging) when it is malformed.
pub fn decode_event(msg: &BusMessage) -> Option<FireEvent> {
    match FireEvent::decode(&msg.payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(topic = %msg.topic, error = %e, "discarding malformed event");
            None
        }
    }
}

fn forward(msg: BusMessage, analysis: &Addr<AnalysisMsg>) {
    let Some(mut event) = decode_event(&msg) else {
        return;
    };
    event.trace_mut().record(stage::INGEST_RECEIVED);
    debug!(
        topic = %msg.topic,
        zone = event.area(),
        trace_id = %event.trace().trace_id(),
        "event received"
    );

    if let Err(e) = analysis.tell(AnalysisMsg::Analyze(event)) {
        warn!(error = %e, "event dropped before analysis");
    }
}

fn worker_loop<C: BusConnection>(
    connection: C,
    sub: Subscription<BusMessage>,
    shutdown_rx: mpsc::Receiver<()>,
    analysis: Addr<AnalysisMsg>,
) {
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => forward(msg, &analysis),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("bus subscription ended");
                break;
            }
        }
    }

    // Readers may be waiting on a full buffer; hang up before closing.
    drop(sub);
    match connection.close() {
        Ok(()) => info!("bus connection closed (ingest)"),
        Err(e) => warn!(error = %e, "error closing bus connection (ingest)"),
    }
}

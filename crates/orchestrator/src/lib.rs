//! Process bootstrap: wires the Redis bus, the HTTP inference client and the
//! zone layout into a running pipeline and keeps it alive until Ctrl-C.

pub mod config;

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use firewatch_infra::event_bus::RedisBus;
use firewatch_infra::{HttpInferenceClient, Pipeline};

use crate::config::OrchestratorConfig;

/// Start the pipeline and block until the process is asked to stop.
///
/// Any startup failure is returned; nothing is left running in that case.
pub fn run(config: OrchestratorConfig) -> anyhow::Result<()> {
    // Actor threads block on their mailboxes, so the runtime only hosts
    // inference calls and the signal listener; the pipeline lives outside it.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("inference")
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    let bus = RedisBus::new(&config.bus_url)
        .context("invalid bus url")?
        .with_subscription_capacity(config.pipeline.mailbox.capacity);
    let inference = HttpInferenceClient::new(&config.inference_url, config.inference_timeout)
        .context("failed to build inference client")?;
    let zones = Arc::new(config.zones.load());

    info!(
        bus = %config.bus_url,
        inference = %inference.url(),
        zones = zones.len(),
        "starting pipeline"
    );

    let pipeline = Pipeline::start(
        &bus,
        Arc::new(inference),
        zones,
        runtime.handle().clone(),
        config.pipeline,
    )
    .context("pipeline startup failed")?;

    let signal = runtime.block_on(tokio::signal::ctrl_c());
    match signal {
        Ok(()) => info!("shutdown requested"),
        Err(e) => tracing::warn!(error = %e, "signal listener failed; shutting down"),
    }

    pipeline.stop();
    runtime.shutdown_timeout(config.inference_timeout);
    Ok(())
}

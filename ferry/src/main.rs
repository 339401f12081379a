//! `ferry`: the CLI entry point. Parses [`Options`], optionally overlays a
//! `--config` TOML file underneath the CLI/env values, builds a
//! [`FerryConfig`], and drives the coordinator to completion.
//!
//! Everything interesting lives in `ferry-server` and its collaborators;
//! this crate is deliberately thin — argument parsing, logging init, and
//! the process-local stand-in for the out-of-scope HTTP dashboard
//! (a `--automatic-cutover` flag and a SIGTERM handler wired to
//! `ControlHandle::shutdown`).

mod options;

use std::process::ExitCode;

use clap::Parser;
use ferry_server::{ControlHandle, Ferry};
use tracing::{error, info};

use crate::options::Options;

#[tokio::main]
async fn main() -> ExitCode {
    let options = Options::parse();
    init_tracing(&options.log_level);

    match run(options).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "ferry exited with a configuration error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install the global `metrics` recorder every crate in the workspace
/// emits into (iterator throughput, streamer lag, write-retry counts).
/// Serving the Prometheus text format over `server_bind_addr` is the
/// dashboard's job, out of scope here — `main` only wires the recorder so
/// the `counter!`/`gauge!` call sites throughout the pipeline have
/// somewhere to go.
fn install_prometheus_exporter() -> anyhow::Result<()> {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("failed to install the prometheus metrics recorder: {e}"))
}

/// Returns `Ok(true)` on a clean run, `Ok(false)` if the pipeline failed
/// (state dump already written by the `ErrorHandler`), `Err` only for
/// configuration problems discovered before `Ferry::initialize` could even
/// spin up the error-reporting path.
async fn run(options: Options) -> anyhow::Result<bool> {
    let config = options.into_ferry_config()?;
    let automatic_cutover = config.automatic_cutover;
    info!(
        tables = config.applicable_tables.len(),
        bind_addr = %config.server_bind_addr,
        "starting ferry",
    );

    install_prometheus_exporter()?;

    let mut ferry = Ferry::initialize(config).await?;
    ferry.start(Vec::new()).await?;

    let control = ControlHandle::new(ferry.state_handle(), ferry.throttle(), ferry.cancellation_token());
    control.set_automatic_cutover(automatic_cutover);

    let shutdown_control = control.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("received shutdown signal, cancelling pipeline");
        shutdown_control.shutdown();
    });

    let outcome = ferry.run(control).await?;

    if outcome.failed {
        for (component, error) in &outcome.errors {
            error!(component, %error, "fatal error reported during run");
        }
        return Ok(false);
    }

    info!(state = ?outcome.state, "ferry reached a clean stop");
    Ok(true)
}

/// SIGTERM (the usual way an orchestrator stops a long-running process)
/// or Ctrl-C, whichever comes first.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

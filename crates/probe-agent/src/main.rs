//! Probe agent binary

use probe_agent::{Agent, Config, RunOutcome, SchedulerHandle};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Can't use tracing yet - not initialized
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    common::logging::init_with_format(
        config.logging.format.as_deref(),
        config.logging.level.as_deref().unwrap_or("info"),
    );

    tracing::info!("Probe agent starting");

    let probes = match config.probe_set() {
        Ok(probes) => probes,
        Err(e) => {
            tracing::error!(error = %e, "Invalid probe configuration");
            return Err(e.into());
        }
    };

    let cancel = CancellationToken::new();
    let running = Agent::new(config.to_agent_settings())
        .start(probes, cancel.clone())
        .await;

    tokio::spawn(watch_signals(running.handle().clone(), cancel));

    match running.wait().await? {
        RunOutcome::Exhausted => tracing::info!("Repeat budget exhausted, exiting"),
        RunOutcome::Cancelled => tracing::info!("Shutdown complete"),
    }

    Ok(())
}

/// Ctrl-C cancels the run; SIGHUP reloads the probe set.
async fn watch_signals(handle: SchedulerHandle, cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP handler unavailable, reload disabled");
                wait_for_ctrl_c(cancel).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = cancel.cancelled() => return,
                _ = hangup.recv() => reload(&handle),
            }
        }
        tracing::info!("Interrupt received, shutting down");
        cancel.cancel();
    }

    #[cfg(not(unix))]
    {
        let _ = handle;
        wait_for_ctrl_c(cancel).await;
    }
}

async fn wait_for_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Reload the configuration file, keeping the current probes on error.
#[cfg(unix)]
fn reload(handle: &SchedulerHandle) {
    let probes = Config::load().and_then(|config| config.probe_set());
    match probes {
        Ok(probes) => handle.reload(probes),
        Err(e) => tracing::error!(error = %e, "Configuration reload failed, keeping current probes"),
    }
}

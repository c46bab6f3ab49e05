//! `leasehold serve`: run the protected job and reaper until interrupted.

use super::CommandContext;
use leasehold::error::{LeaseError, Result};
use leasehold::lifecycle::BackgroundJobs;
use leasehold::scheduler::{CommandJob, Job};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

pub async fn cmd_serve(ctx: &CommandContext) -> Result<()> {
    serve_until(ctx, wait_for_shutdown_signal()).await
}

/// Run the background jobs until `stop` resolves, then shut down.
///
/// Shutdown runs whatever `stop` resolves to; an error from it is returned
/// after the leases are released.
async fn serve_until<F>(ctx: &CommandContext, stop: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let job = configured_job(ctx)?;
    let background = BackgroundJobs::from_config(&ctx.config, ctx.manager.clone(), job);
    background.initialize();

    info!(
        instance = %ctx.manager.instance_id(),
        database = %ctx.config.database_path,
        "Serving; press Ctrl-C to stop"
    );

    let stopped = stop.await;
    if let Err(e) = &stopped {
        error!(error = %e, "Lost the shutdown signal listener, shutting down");
    }

    let report = background.shutdown().await?;
    println!(
        "Stopped {} timer(s), released {} lock(s), removed {} expired lock(s).",
        report.timers_stopped, report.released, report.cleaned
    );
    stopped
}

fn configured_job(ctx: &CommandContext) -> Result<Option<Arc<dyn Job>>> {
    let Some(command) = &ctx.config.job_command else {
        return Ok(None);
    };
    let job = CommandJob::parse(&ctx.config.job_lock_name, command)?;
    Ok(Some(Arc::new(job)))
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| LeaseError::UserError(format!("failed to install SIGTERM handler: {}", e)))?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| {
                LeaseError::UserError(format!("failed to listen for Ctrl-C: {}", e))
            })?;
            warn!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => warn!("Received SIGTERM, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| LeaseError::UserError(format!("failed to listen for Ctrl-C: {}", e)))?;
    warn!("Received Ctrl-C, shutting down");
    Ok(())
}

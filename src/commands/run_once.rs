//! `leasehold run-once`: one protected run, for cron-style deployments.

use super::CommandContext;
use crate::cli::RunOnceArgs;
use leasehold::error::{LeaseError, Result};
use leasehold::scheduler::{CommandJob, Scheduler, TickOutcome};

pub async fn cmd_run_once(ctx: &CommandContext, args: RunOnceArgs) -> Result<()> {
    let command = args
        .command
        .or_else(|| ctx.config.job_command.clone())
        .ok_or_else(|| {
            LeaseError::UserError(
                "no job command to run.\n\n\
                 Set `job_command` in leasehold.yaml or LEASEHOLD_JOB_COMMAND, or pass:\n  \
                 leasehold run-once --command '<command>'"
                    .to_string(),
            )
        })?;

    let job = CommandJob::parse(&ctx.config.job_lock_name, &command)?;
    let schedule = ctx.config.job_schedule();
    let scheduler = Scheduler::new(ctx.manager.clone());

    match scheduler.run_once(&job, &schedule).await {
        TickOutcome::Completed { report, duration } => {
            println!(
                "Job '{}' completed in {:.1}s: {} total, {} updated, {} errors",
                schedule.lock_name,
                duration.as_secs_f64(),
                report.total,
                report.updated,
                report.errors
            );
            for detail in &report.error_details {
                println!("  - {}", detail);
            }
            Ok(())
        }
        TickOutcome::Skipped => {
            let holder = scheduler
                .job_info(&schedule.lock_name)
                .await?
                .lock
                .map(|lock| lock.current_holder)
                .unwrap_or_else(|| "unknown".to_string());
            Err(LeaseError::LockError(format!(
                "'{}' is held by {}",
                schedule.lock_name, holder
            )))
        }
        TickOutcome::Failed(message) => Err(LeaseError::JobError(message)),
    }
}

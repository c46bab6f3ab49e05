//! `leasehold locks`: inspect and manage lock rows.

use super::CommandContext;
use crate::cli::{LockClearArgs, LockListArgs, LockShowArgs};
use chrono::Utc;
use leasehold::error::{LeaseError, Result};
use leasehold::store::{LockRecord, format_duration};
use serde::Serialize;

pub async fn cmd_locks_list(ctx: &CommandContext, args: LockListArgs) -> Result<()> {
    let locks = ctx.manager.list_active_locks().await?;

    if args.json {
        println!("{}", to_json(&locks)?);
        return Ok(());
    }

    if locks.is_empty() {
        println!("No active locks.");
        return Ok(());
    }

    println!("Active locks ({}):", locks.len());
    println!();

    for lock in &locks {
        println!("  {}:", lock.lock_name);
        print_details(lock, "    ");
        println!();
    }

    Ok(())
}

pub async fn cmd_locks_show(ctx: &CommandContext, args: LockShowArgs) -> Result<()> {
    let Some(lock) = ctx.manager.get_lock_info(&args.name).await? else {
        return Err(LeaseError::UserError(format!(
            "no lock named '{}'",
            args.name
        )));
    };

    if args.json {
        println!("{}", to_json(&lock)?);
    } else {
        println!("Lock: {}", lock.lock_name);
        print_details(&lock, "  ");
    }
    Ok(())
}

pub async fn cmd_locks_cleanup(ctx: &CommandContext) -> Result<()> {
    let removed = ctx.manager.cleanup_expired_locks().await?;
    if removed == 0 {
        println!("No expired locks.");
    } else {
        println!("Removed {} expired lock(s).", removed);
    }
    Ok(())
}

pub async fn cmd_locks_clear(ctx: &CommandContext, args: LockClearArgs) -> Result<()> {
    if !args.force {
        return Err(LeaseError::UserError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a live lock lets a second instance run the protected job concurrently.\n\
             Only clear locks if you are certain the holder has crashed.\n\n\
             To clear the lock, run:\n  leasehold locks clear {} --force",
            args.name
        )));
    }

    let Some(lock) = ctx.manager.get_lock_info(&args.name).await? else {
        return Err(LeaseError::UserError(format!(
            "no lock named '{}'",
            args.name
        )));
    };

    if !ctx.manager.force_release(&args.name).await? {
        println!("Lock '{}' was already gone.", args.name);
        return Ok(());
    }

    println!("Cleared lock: {}", lock.lock_name);
    println!();
    println!("Lock details:");
    print_details(&lock, "  ");
    Ok(())
}

fn print_details(lock: &LockRecord, indent: &str) {
    let now = Utc::now();
    let remaining = lock.time_to_expiry(now);

    println!("{}Owner:      {}", indent, lock.owner_instance_id);
    println!(
        "{}Acquired:   {}",
        indent,
        lock.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "{}Held:       {}",
        indent,
        format_duration(now.signed_duration_since(lock.acquired_at))
    );
    println!(
        "{}Heartbeat:  {} ago",
        indent,
        format_duration(now.signed_duration_since(lock.heartbeat_at))
    );
    if lock.is_expired_at(now) {
        println!(
            "{}Status:     EXPIRED {} ago",
            indent,
            format_duration(remaining)
        );
    } else {
        println!("{}Expires in: {}", indent, format_duration(remaining));
    }
    if let Some(metadata) = &lock.metadata {
        println!("{}Metadata:   {}", indent, metadata);
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| LeaseError::UserError(format!("failed to serialize locks: {}", e)))
}

//! CLI argument parsing for leasehold.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Leasehold: run a periodic job on exactly one of many replicas.
///
/// Replicas coordinate through lease rows in a shared SQLite database:
/// - Each run of the job takes a named lease with a TTL
/// - The holder heartbeats while it works and releases when done
/// - Expired leases are reaped or taken over by a peer
#[derive(Parser, Debug)]
#[command(name = "leasehold")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file (default: ./leasehold.yaml if present).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the shared lock database (overrides config and environment).
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for leasehold.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the protected job and the lock reaper until interrupted.
    ///
    /// Every replica runs `serve`; on each tick only the replica holding
    /// the job lock runs the job. SIGINT/SIGTERM release every lease this
    /// process holds before exiting.
    Serve,

    /// Run the protected job once under its lock.
    ///
    /// Exits with code 4 if another instance holds the lock.
    RunOnce(RunOnceArgs),

    /// Inspect and manage lock rows.
    Locks(LocksCommand),
}

/// Arguments for the `run-once` command.
#[derive(Parser, Debug)]
pub struct RunOnceArgs {
    /// Command to run instead of the configured `job_command`.
    #[arg(long, value_name = "COMMAND")]
    pub command: Option<String>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LocksCommand {
    #[command(subcommand)]
    pub action: LocksAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LocksAction {
    /// List all unexpired locks.
    ///
    /// Shows owner, age, last heartbeat and time to expiry.
    List(LockListArgs),

    /// Show one lock row, expired or not.
    Show(LockShowArgs),

    /// Delete every expired lock row.
    Cleanup,

    /// Delete a lock row regardless of owner.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LockClearArgs),
}

/// Arguments for the `locks list` command.
#[derive(Parser, Debug)]
pub struct LockListArgs {
    /// Print rows as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `locks show` command.
#[derive(Parser, Debug)]
pub struct LockShowArgs {
    /// Lock name.
    pub name: String,

    /// Print the row as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `locks clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Lock name to clear.
    pub name: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

//! Command implementations for leasehold.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, and the shared setup every command needs: the resolved
//! config and a lock manager over the shared store.

mod locks;
mod run_once;
mod serve;

use crate::cli::{Cli, Command, LocksAction};
use leasehold::config::Config;
use leasehold::error::Result;
use leasehold::instance::InstanceId;
use leasehold::locks::LockManager;
use leasehold::store::SqliteLockStore;
use std::sync::Arc;
use tracing::debug;

/// Config and lock manager for one command invocation.
pub(crate) struct CommandContext {
    pub config: Config,
    pub manager: LockManager,
}

impl CommandContext {
    /// Resolve config (file, environment, then `--database`) and open the store.
    pub fn open(cli: &Cli) -> Result<Self> {
        let mut config = Config::resolve(cli.config.as_deref())?;
        if let Some(database) = &cli.database {
            config.database_path = database.to_string_lossy().into_owned();
        }

        let store = SqliteLockStore::open(&config.database_path)?;
        let instance_id = InstanceId::generate();
        debug!(database = %config.database_path, instance = %instance_id, "Opened lock store");

        let manager = LockManager::with_retry_policy(Arc::new(store), instance_id, config.retry);
        Ok(Self { config, manager })
    }
}

/// Dispatch a command to its implementation.
pub async fn dispatch(cli: Cli) -> Result<()> {
    let ctx = CommandContext::open(&cli)?;

    match cli.command {
        Command::Serve => serve::cmd_serve(&ctx).await,
        Command::RunOnce(args) => run_once::cmd_run_once(&ctx, args).await,
        Command::Locks(locks_cmd) => match locks_cmd.action {
            LocksAction::List(args) => locks::cmd_locks_list(&ctx, args).await,
            LocksAction::Show(args) => locks::cmd_locks_show(&ctx, args).await,
            LocksAction::Cleanup => locks::cmd_locks_cleanup(&ctx).await,
            LocksAction::Clear(args) => locks::cmd_locks_clear(&ctx, args).await,
        },
    }
}

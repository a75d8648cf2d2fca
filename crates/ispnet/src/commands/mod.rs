//! Command dispatch: bridges CLI args -> platform services -> output formatting.

pub mod backup;
pub mod config_cmd;
pub mod devices;
pub mod failover;
pub mod health;
pub mod sync;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(ctx, args, global).await,
        Command::Sync(args) => sync::handle(ctx, args, global).await,
        Command::Failover(args) => failover::handle(ctx, args, global).await,
        Command::Backup(args) => backup::handle(ctx, args, global).await,
        Command::Health(args) => health::handle(ctx, args, global).await,
        // Handled before a platform is built
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions are dispatched without a platform".into(),
        )),
    }
}

use clap::{Args, Subcommand};
use serde::Serialize;

use dockhand::notify::{self, NotificationMessage, NotificationOutcome};
use dockhand::release;
use dockhand::utils::command::ProcessRunner;
use std::sync::Arc;

use super::{CmdResult, ConfigArgs, ReleaseArgs};

#[derive(Args)]
pub struct NotifyArgs {
    #[command(subcommand)]
    command: NotifyCommand,
}

#[derive(Args)]
pub struct MessageArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub release: ReleaseArgs,

    /// Run status to report (SUCCESS, FAILURE, ...)
    #[arg(long)]
    pub status: String,

    /// Stage to name as the failure point
    #[arg(long)]
    pub failed_stage: Option<String>,
}

#[derive(Subcommand)]
enum NotifyCommand {
    /// Print the message a run with this status would send
    Preview(MessageArgs),
    /// Compose and send a message through the configured transport
    Send(MessageArgs),
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum NotifyOutput {
    #[serde(rename = "notify.preview")]
    Preview { message: NotificationMessage },
    #[serde(rename = "notify.send")]
    Send {
        message: NotificationMessage,
        outcome: NotificationOutcome,
    },
}

pub fn run(args: NotifyArgs, _global: &super::GlobalArgs) -> CmdResult<NotifyOutput> {
    match args.command {
        NotifyCommand::Preview(args) => {
            let loaded = super::load_config(&args.config, &args.release.overrides())?;
            let message =
                release::preview_notification(&loaded.config, &args.status, args.failed_stage.as_deref());
            Ok((NotifyOutput::Preview { message }, 0))
        }
        NotifyCommand::Send(args) => {
            let loaded = super::load_config(&args.config, &args.release.overrides())?;
            let message =
                release::preview_notification(&loaded.config, &args.status, args.failed_stage.as_deref());
            let mailer = notify::mailer_from_config(&loaded.config.notify, Arc::new(ProcessRunner));
            let outcome = notify::send(mailer.as_ref(), &message);
            let exit_code = if outcome.error.is_some() { 1 } else { 0 };
            Ok((NotifyOutput::Send { message, outcome }, exit_code))
        }
    }
}

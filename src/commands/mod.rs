use clap::Args;
use std::path::PathBuf;

use dockhand::config::{self, LoadedConfig, Overrides};
use dockhand::pipeline::CancelToken;

pub type CmdResult<T> = dockhand::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub cancel: CancelToken,
}

/// Where to read dockhand.json from.
#[derive(Args, Default, Debug)]
pub struct ConfigArgs {
    /// Config file (default: ./dockhand.json, then ~/.config/dockhand/dockhand.json)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Invocation parameters. Anything given here wins over the config file.
#[derive(Args, Default, Debug)]
pub struct ReleaseArgs {
    /// Comma-separated cleanup types: container, image, volume, all
    #[arg(long, value_name = "LIST", env = "DOCKHAND_CLEANUP_TYPES")]
    pub cleanup_types: Option<String>,

    /// Project (image) name
    #[arg(long)]
    pub project: Option<String>,

    /// Registry user that owns the image
    #[arg(long)]
    pub registry_user: Option<String>,

    /// Container name on the remote host
    #[arg(long)]
    pub container: Option<String>,

    /// Image tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Remote docker host
    #[arg(long)]
    pub host: Option<String>,

    /// Job name used in notifications
    #[arg(long = "job")]
    pub job_name: Option<String>,

    /// Run number used in notifications
    #[arg(long)]
    pub run_number: Option<u64>,

    /// Link to the run's console output
    #[arg(long)]
    pub console_url: Option<String>,

    /// Directory the local tools run in
    #[arg(long)]
    pub workspace: Option<String>,
}

impl ReleaseArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            cleanup_types: self.cleanup_types.clone(),
            project: self.project.clone(),
            registry_user: self.registry_user.clone(),
            container: self.container.clone(),
            tag: self.tag.clone(),
            host: self.host.clone(),
            job_name: self.job_name.clone(),
            run_number: self.run_number,
            console_url: self.console_url.clone(),
            workspace: self.workspace.clone(),
        }
    }
}

/// Load dockhand.json and apply command-line overrides.
pub(crate) fn load_config(args: &ConfigArgs, overrides: &Overrides) -> dockhand::Result<LoadedConfig> {
    let cwd = std::env::current_dir().map_err(|e| {
        dockhand::Error::internal_io(e.to_string(), Some("resolve current directory".to_string()))
    })?;

    let mut loaded = config::load(args.config.as_deref(), &cwd)?;
    loaded.config.apply(overrides);
    Ok(loaded)
}

pub mod clean;
pub mod notify;
pub mod plan;
pub mod run;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (dockhand::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Clean(args) => dispatch!(args, global, clean),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Notify(args) => dispatch!(args, global, notify),
    }
}

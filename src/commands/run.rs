use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use dockhand::pipeline::StageFailure;
use dockhand::release::{self, ReleaseEnv, ReleasePlan, ReleaseResult};

use super::{CmdResult, ConfigArgs, ReleaseArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub release: ReleaseArgs,

    /// Show the stages and commands without running anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_source: Option<PathBuf>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ReleasePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReleaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<dockhand::Error>,
}

pub fn run(args: RunArgs, global: &super::GlobalArgs) -> CmdResult<RunOutput> {
    let loaded = super::load_config(&args.config, &args.release.overrides())?;
    let env = ReleaseEnv::from_config(&loaded.config);

    if args.dry_run {
        let plan = release::plan(&loaded.config, &env)?;
        return Ok((
            RunOutput {
                command: "run",
                config_source: loaded.source,
                dry_run: true,
                plan: Some(plan),
                result: None,
                error: None,
            },
            0,
        ));
    }

    let result = release::run(&loaded.config, &env, global.cancel.clone())?;
    let exit_code = result.exit_code();
    let error = result.run.failure.clone().map(StageFailure::into_error);

    Ok((
        RunOutput {
            command: "run",
            config_source: loaded.source,
            dry_run: false,
            plan: None,
            result: Some(result),
            error,
        },
        exit_code,
    ))
}

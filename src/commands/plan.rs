use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use dockhand::release::{self, ReleaseEnv, ReleasePlan};

use super::{CmdResult, ConfigArgs, ReleaseArgs};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub release: ReleaseArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_source: Option<PathBuf>,
    pub plan: ReleasePlan,
}

pub fn run(args: PlanArgs, _global: &super::GlobalArgs) -> CmdResult<PlanOutput> {
    let loaded = super::load_config(&args.config, &args.release.overrides())?;
    let env = ReleaseEnv::from_config(&loaded.config);
    let plan = release::plan(&loaded.config, &env)?;

    Ok((
        PlanOutput {
            command: "plan",
            config_source: loaded.source,
            plan,
        },
        0,
    ))
}

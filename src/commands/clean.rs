use clap::Args;
use serde::Serialize;

use dockhand::cleanup::{self, CleanupReport};
use dockhand::config::Overrides;
use dockhand::release::{self, ReleaseEnv};

use super::{CmdResult, ConfigArgs};

#[derive(Args)]
pub struct CleanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Comma-separated cleanup types: container, image, volume, all
    #[arg(long, value_name = "LIST", env = "DOCKHAND_CLEANUP_TYPES")]
    pub types: Option<String>,

    /// Remote docker host
    #[arg(long)]
    pub host: Option<String>,

    /// List the commands without running them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanOutput {
    pub command: &'static str,
    pub host: String,
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CleanupReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

pub fn run(args: CleanArgs, _global: &super::GlobalArgs) -> CmdResult<CleanOutput> {
    let overrides = Overrides {
        cleanup_types: args.types.clone(),
        host: args.host.clone(),
        ..Overrides::default()
    };
    let loaded = super::load_config(&args.config, &overrides)?;
    let config = &loaded.config;
    let tokens = cleanup::parse_request(&config.cleanup.types);

    if args.dry_run {
        let planned = cleanup::describe(&tokens);
        return Ok((
            CleanOutput {
                command: "clean",
                host: config.remote.host.clone(),
                types: tokens,
                report: None,
                planned,
                hints: Vec::new(),
            },
            0,
        ));
    }

    let env = ReleaseEnv::from_config(config);
    let report = release::clean(config, &env)?;

    let hints = if report.skipped.is_empty() {
        Vec::new()
    } else {
        vec!["Valid cleanup types: container, image, volume, all".to_string()]
    };

    Ok((
        CleanOutput {
            command: "clean",
            host: config.remote.host.clone(),
            types: tokens,
            report: Some(report),
            planned: Vec::new(),
            hints,
        },
        0,
    ))
}

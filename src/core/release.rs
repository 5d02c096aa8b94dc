//! Release orchestration.
//!
//! Turns a [`PipelineConfig`] into the standard stage list, runs it under a
//! [`StageRunner`] and sends the status notification from the finalizer.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::cleanup::{parse_request, CleanupDispatcher, CleanupReport, CleanupStage};
use crate::config::PipelineConfig;
use crate::credential::{ConfiguredCredential, CredentialSource};
use crate::deploy::DeployStage;
use crate::error::{Error, Result};
use crate::notify::{self, Mailer, MessageFacts, NotificationComposer, NotificationMessage, NotificationOutcome};
use crate::pipeline::{CancelToken, PipelineRun, RunStatus, StageList, StageRunner};
use crate::ssh::{render_invocation, RemoteExecutor};
use crate::tools::{ToolStage, ToolStep};
use crate::utils::command::{CommandRunner, ProcessRunner};
use crate::utils::template::TemplateVars;

pub const BUILD_APPLICATION: &str = "Build Application";
pub const STATIC_ANALYSIS: &str = "Static Analysis";
pub const BUILD_DOCKER_IMAGE: &str = "Build Docker Image";
pub const SCAN_IMAGE: &str = "Scan Image";
pub const PUSH_IMAGE: &str = "Push Image";
pub const CLEAN_DOCKER_RESOURCES: &str = "Clean Docker Resources";
pub const DEPLOY_CONTAINER: &str = "Deploy Container";

/// Standard stage order.
pub const STAGE_ORDER: [&str; 7] = [
    BUILD_APPLICATION,
    STATIC_ANALYSIS,
    BUILD_DOCKER_IMAGE,
    SCAN_IMAGE,
    PUSH_IMAGE,
    CLEAN_DOCKER_RESOURCES,
    DEPLOY_CONTAINER,
];

fn is_remote_stage(name: &str) -> bool {
    name == CLEAN_DOCKER_RESOURCES || name == DEPLOY_CONTAINER
}

/// Collaborators a release talks to. Swapped for fakes in tests.
pub struct ReleaseEnv {
    pub runner: Arc<dyn CommandRunner>,
    pub credentials: Arc<dyn CredentialSource>,
    pub mailer: Box<dyn Mailer>,
}

impl ReleaseEnv {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        Self {
            credentials: Arc::new(ConfiguredCredential::new(
                config.remote.principal.clone(),
                config.remote.key.clone(),
            )),
            mailer: notify::mailer_from_config(&config.notify, runner.clone()),
            runner,
        }
    }
}

/// Stage names that will run, after `stages.skip`.
pub fn active_stages(config: &PipelineConfig) -> Result<Vec<&'static str>> {
    for name in &config.stages.skip {
        if !STAGE_ORDER.iter().any(|known| *known == name.as_str()) {
            return Err(Error::config_invalid_value(
                "stages.skip",
                Some(name.clone()),
                format!("unknown stage; expected one of: {}", STAGE_ORDER.join(", ")),
            ));
        }
    }
    Ok(STAGE_ORDER
        .iter()
        .copied()
        .filter(|name| !config.stages.skip.iter().any(|s| s.as_str() == *name))
        .collect())
}

/// Assemble the stage list. All validation happens here, before any stage runs.
pub fn build_stages(config: &PipelineConfig, env: &ReleaseEnv) -> Result<StageList> {
    let names = active_stages(config)?;
    let params = config.release_params()?;
    let tools = &config.tools;
    let mut vars = params.variables(&tools.scan_report);
    vars.insert(TemplateVars::JOB.to_string(), config.job.name.clone());
    vars.insert(TemplateVars::RUN_NUMBER.to_string(), config.job.run_number.to_string());
    let workspace = config.workspace();

    let executor = if names.iter().any(|n| is_remote_stage(n)) {
        Some(Arc::new(RemoteExecutor::from_config(
            config.require_remote()?,
            env.runner.clone(),
        )))
    } else {
        None
    };

    let mut stages = StageList::new();
    for name in names {
        let tool = |field: &str, argv: &[String]| -> Result<ToolStage> {
            Ok(ToolStage::single(
                ToolStep::from_template(field, argv, &vars)?,
                workspace.clone(),
                env.runner.clone(),
            ))
        };

        match name {
            BUILD_APPLICATION => stages.push(name, tool("tools.build", &tools.build)?),
            STATIC_ANALYSIS => stages.push(name, tool("tools.static_analysis", &tools.static_analysis)?),
            BUILD_DOCKER_IMAGE => stages.push(name, tool("tools.image_build", &tools.image_build)?),
            SCAN_IMAGE => stages.push(
                name,
                tool("tools.image_scan", &tools.image_scan)?.with_artifact(&tools.scan_report),
            ),
            PUSH_IMAGE => {
                let steps = vec![
                    ToolStep::from_template("tools.registry_login", &tools.registry_login, &vars)?
                        .with_stdin(config.registry.password.clone()),
                    ToolStep::from_template("tools.image_push", &tools.image_push, &vars)?,
                ];
                stages.push(name, ToolStage::new(steps, workspace.clone(), env.runner.clone()));
            }
            CLEAN_DOCKER_RESOURCES | DEPLOY_CONTAINER => {
                let executor = executor
                    .clone()
                    .ok_or_else(|| Error::internal_unexpected("remote executor not configured"))?;
                if name == CLEAN_DOCKER_RESOURCES {
                    stages.push(
                        name,
                        CleanupStage::new(executor, env.credentials.clone(), parse_request(&config.cleanup.types)),
                    );
                } else {
                    stages.push(name, DeployStage::new(executor, env.credentials.clone(), params.clone()));
                }
            }
            _ => {}
        }
    }

    Ok(stages)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStage {
    pub ordinal: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePlan {
    pub job_name: String,
    pub run_number: u64,
    pub image: String,
    pub workspace: PathBuf,
    pub stages: Vec<PlannedStage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

/// What a run would do, without doing it. Remote commands are shown in their
/// ssh form with the key origin in place of a path.
pub fn plan(config: &PipelineConfig, env: &ReleaseEnv) -> Result<ReleasePlan> {
    let stages = build_stages(config, env)?.into_vec();
    let params = config.release_params()?;
    let key = config.remote.key.describe();

    let planned = stages
        .iter()
        .map(|stage| {
            let remote = is_remote_stage(&stage.name);
            let commands = stage
                .describe()
                .into_iter()
                .map(|cmd| {
                    if remote && !cmd.starts_with('#') {
                        render_invocation(&key, &config.remote.principal, &config.remote.host, &cmd)
                    } else {
                        cmd
                    }
                })
                .collect();
            PlannedStage {
                ordinal: stage.ordinal,
                name: stage.name.clone(),
                target: remote.then(|| format!("{}@{}", config.remote.principal, config.remote.host)),
                commands,
            }
        })
        .collect();

    Ok(ReleasePlan {
        job_name: config.job.name.clone(),
        run_number: config.job.run_number,
        image: params.image,
        workspace: config.workspace(),
        stages: planned,
        skipped: config.stages.skip.clone(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResult {
    pub run: PipelineRun,
    pub notification: Option<NotificationOutcome>,
}

impl ReleaseResult {
    pub fn exit_code(&self) -> i32 {
        match self.run.status {
            RunStatus::Success => 0,
            RunStatus::Failure | RunStatus::Unknown => 1,
        }
    }
}

/// Run the full release. Configuration problems are returned as `Err` before
/// any stage starts; everything after that is reported through the run.
pub fn run(config: &PipelineConfig, env: &ReleaseEnv, cancel: CancelToken) -> Result<ReleaseResult> {
    let stages = build_stages(config, env)?;
    let run = PipelineRun::new(config.job.name.clone(), config.job.run_number, stages);
    let workspace = config.workspace();
    let composer = NotificationComposer::new(&config.notify, &workspace);
    let console_url = config.job.console_url.as_deref();

    log_status!(
        "release",
        "{} #{}: {} stage(s)",
        run.job_name,
        run.run_number,
        run.stages.len()
    );

    let mut notification = None;
    let run = StageRunner::with_cancel(cancel).run_with_finalizer(run, |run| {
        let message = composer.compose(run, console_url);
        notification = Some(notify::send(env.mailer.as_ref(), &message));
    });

    log_status!("release", "{} #{} finished: {}", run.job_name, run.run_number, run.status);
    Ok(ReleaseResult { run, notification })
}

/// Run only the cleanup dispatcher against the configured remote host.
pub fn clean(config: &PipelineConfig, env: &ReleaseEnv) -> Result<CleanupReport> {
    let executor = RemoteExecutor::from_config(config.require_remote()?, env.runner.clone());
    let tokens = parse_request(&config.cleanup.types);
    CleanupDispatcher::new(&executor, env.credentials.as_ref()).clean(&tokens)
}

/// Compose the message a run with `status` would send, without sending it.
pub fn preview_notification(config: &PipelineConfig, status: &str, failed_stage: Option<&str>) -> NotificationMessage {
    let workspace = config.workspace();
    NotificationComposer::new(&config.notify, &workspace).compose_facts(&MessageFacts {
        job_name: &config.job.name,
        run_number: config.job.run_number,
        status,
        console_url: config.job.console_url.as_deref(),
        failed_stage,
    })
}

//! External collaborators: build tool, analyzers, scanner, registry client.
//!
//! Each is an argv run in the workspace. dockhand only looks at the exit
//! status and, for the scanner, whether the report file showed up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SecretRef;
use crate::credential::resolve_secret;
use crate::error::{Error, Result, ToolCommandFailedDetails};
use crate::pipeline::{StageAction, StageContext, StageReport};
use crate::utils::command::{CommandRunner, CommandSpec};
use crate::utils::shell;
use crate::utils::template;

/// One collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStep {
    pub argv: Vec<String>,
    /// Secret piped to stdin (registry password for `docker login`).
    pub stdin: Option<SecretRef>,
}

impl ToolStep {
    /// Render `{{var}}` placeholders per argv element.
    pub fn from_template(
        field: &str,
        argv: &[String],
        vars: &HashMap<String, String>,
    ) -> Result<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(Error::config_invalid_value(
                field,
                None,
                "command must have at least a program name",
            ));
        }
        Ok(Self {
            argv: template::render_argv(argv, vars),
            stdin: None,
        })
    }

    pub fn with_stdin(mut self, secret: SecretRef) -> Self {
        self.stdin = Some(secret);
        self
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn display(&self) -> String {
        let line = shell::quote_args(&self.argv);
        match &self.stdin {
            Some(secret) => format!("{} < {}", line, secret.describe()),
            None => line,
        }
    }
}

/// A stage made of one or more collaborator calls, run in order.
pub struct ToolStage {
    steps: Vec<ToolStep>,
    workspace: PathBuf,
    /// File the last step is expected to produce, relative to the workspace.
    artifact: Option<PathBuf>,
    runner: Arc<dyn CommandRunner>,
}

impl ToolStage {
    pub fn new(steps: Vec<ToolStep>, workspace: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            steps,
            workspace,
            artifact: None,
            runner,
        }
    }

    pub fn single(step: ToolStep, workspace: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(vec![step], workspace, runner)
    }

    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    fn run_step(&self, step: &ToolStep) -> Result<()> {
        let mut spec = CommandSpec::new(step.program())
            .args(step.argv[1..].iter().cloned())
            .current_dir(&self.workspace);

        if let Some(secret) = &step.stdin {
            spec = spec.stdin(resolve_secret(secret)?.into_bytes());
        }

        let output = self.runner.run(&spec);
        if output.success {
            return Ok(());
        }

        Err(Error::tool_command_failed(ToolCommandFailedDetails {
            tool: step.program().to_string(),
            argv: step.argv.clone(),
            exit_code: output.exit_code,
            stderr: output.error_text().to_string(),
        }))
    }
}

impl StageAction for ToolStage {
    fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        for step in &self.steps {
            log_status!("tool", "{}: {}", ctx.stage, step.display());
            self.run_step(step)?;
        }

        let tools: Vec<&str> = self.steps.iter().map(|s| s.program()).collect();
        let mut report = StageReport::summary(format!("ran {}", tools.join(", ")));

        if let Some(artifact) = &self.artifact {
            let path = self.workspace.join(artifact);
            if path.exists() {
                report = report.with_artifact(path);
            } else {
                log_status!("tool", "{}: expected {} was not produced", ctx.stage, path.display());
            }
        }

        Ok(report)
    }

    fn describe(&self) -> Vec<String> {
        self.steps.iter().map(ToolStep::display).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::fake::ScriptedRunner;
    use crate::utils::command::CommandOutput;

    fn ctx() -> StageContext<'static> {
        StageContext {
            run_id: "run",
            stage: "Build Application",
            ordinal: 0,
        }
    }

    fn vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("image".to_string(), "acme/shop:latest".to_string());
        vars
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn renders_and_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let step = ToolStep::from_template("tools.image_push", &argv(&["docker", "push", "{{image}}"]), &vars()).unwrap();
        let stage = ToolStage::single(step, dir.path().to_path_buf(), runner.clone());

        let report = stage.run(&ctx()).unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].argv(), vec!["docker", "push", "acme/shop:latest"]);
        assert_eq!(calls[0].current_dir.as_deref(), Some(dir.path()));
        assert_eq!(report.summary.as_deref(), Some("ran docker"));
    }

    #[test]
    fn failure_carries_tool_details() {
        let runner = Arc::new(ScriptedRunner::replying(vec![CommandOutput::failed(
            1,
            "BUILD FAILURE",
        )]));
        let step = ToolStep::from_template("tools.build", &argv(&["mvn", "package"]), &vars()).unwrap();
        let stage = ToolStage::single(step, PathBuf::from("."), runner);

        let err = stage.run(&ctx()).unwrap_err();

        assert_eq!(err.code.as_str(), "tool.command_failed");
        assert_eq!(err.details["tool"], "mvn");
        assert_eq!(err.details["stderr"], "BUILD FAILURE");
    }

    #[test]
    fn later_steps_skip_after_failure() {
        let runner = Arc::new(ScriptedRunner::replying(vec![CommandOutput::failed(1, "denied")]));
        let steps = vec![
            ToolStep::from_template("a", &argv(&["docker", "login"]), &vars()).unwrap(),
            ToolStep::from_template("b", &argv(&["docker", "push", "{{image}}"]), &vars()).unwrap(),
        ];
        let stage = ToolStage::new(steps, PathBuf::from("."), runner.clone());

        assert!(stage.run(&ctx()).is_err());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn stdin_secret_is_piped() {
        std::env::set_var("DOCKHAND_TEST_REGISTRY_PW", "hunter2");
        let runner = Arc::new(ScriptedRunner::default());
        let step = ToolStep::from_template("login", &argv(&["docker", "login", "--password-stdin"]), &vars())
            .unwrap()
            .with_stdin(SecretRef::Env {
                var: "DOCKHAND_TEST_REGISTRY_PW".to_string(),
            });
        assert!(!step.display().contains("hunter2"));

        ToolStage::single(step, PathBuf::from("."), runner.clone())
            .run(&ctx())
            .unwrap();

        assert_eq!(runner.calls()[0].stdin.as_deref(), Some(&b"hunter2"[..]));
    }

    #[test]
    fn artifact_attached_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let step = ToolStep::from_template("scan", &argv(&["trivy", "image", "{{image}}"]), &vars()).unwrap();

        let missing = ToolStage::single(step.clone(), dir.path().to_path_buf(), runner.clone())
            .with_artifact("report.html")
            .run(&ctx())
            .unwrap();
        assert!(missing.artifact.is_none());

        std::fs::write(dir.path().join("report.html"), "<html/>").unwrap();
        let present = ToolStage::single(step, dir.path().to_path_buf(), runner)
            .with_artifact("report.html")
            .run(&ctx())
            .unwrap();
        assert_eq!(present.artifact, Some(dir.path().join("report.html")));
    }

    #[test]
    fn empty_argv_is_config_error() {
        let err = ToolStep::from_template("tools.build", &[], &vars()).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }
}

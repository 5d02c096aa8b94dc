//! "Deploy Container": replace the running container on the remote host.

use std::sync::Arc;

use crate::config::ReleaseParams;
use crate::credential::CredentialSource;
use crate::error::Result;
use crate::pipeline::{StageAction, StageContext, StageReport};
use crate::ssh::{RemoteCommand, RemoteExecutor};

pub struct DeployStage {
    executor: Arc<RemoteExecutor>,
    credentials: Arc<dyn CredentialSource>,
    params: ReleaseParams,
}

impl DeployStage {
    pub fn new(
        executor: Arc<RemoteExecutor>,
        credentials: Arc<dyn CredentialSource>,
        params: ReleaseParams,
    ) -> Self {
        Self {
            executor,
            credentials,
            params,
        }
    }

    fn remove_command(&self) -> RemoteCommand {
        RemoteCommand::new(["docker", "rm", "-f", self.params.container.as_str()])
    }

    fn pull_command(&self) -> RemoteCommand {
        RemoteCommand::new(["docker", "pull", self.params.image.as_str()])
    }

    fn run_command(&self) -> RemoteCommand {
        RemoteCommand::new([
            "docker",
            "run",
            "-d",
            "--name",
            self.params.container.as_str(),
            "--restart",
            "unless-stopped",
            "-p",
            self.params.port_mapping.as_str(),
            self.params.image.as_str(),
        ])
    }
}

impl StageAction for DeployStage {
    fn run(&self, _ctx: &StageContext<'_>) -> Result<StageReport> {
        let creds = self.credentials.as_ref();

        self.executor.execute(&self.pull_command(), creds)?;

        // nothing to remove on a first deploy
        if let Err(err) = self.executor.execute(&self.remove_command(), creds) {
            log_status!("deploy", "No previous '{}' removed: {}", self.params.container, err);
        }

        let started = self.executor.execute(&self.run_command(), creds)?;
        let container_id = started.stdout.trim().to_string();

        Ok(StageReport::summary(format!(
            "{} running as {} on {}",
            self.params.image, self.params.container, self.executor.host
        ))
        .with_data(serde_json::json!({
            "containerId": container_id,
            "image": self.params.image,
            "container": self.params.container,
        })))
    }

    fn describe(&self) -> Vec<String> {
        vec![
            self.pull_command().to_shell(),
            self.remove_command().to_shell(),
            self.run_command().to_shell(),
        ]
    }
}

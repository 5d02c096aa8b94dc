use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::credential::{with_credential, CredentialScope, CredentialSource};
use crate::error::{Error, RemoteCommandFailedDetails, Result, TargetDetails};
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::shell;

/// A command for the remote shell, held as argv until it is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    argv: Vec<String>,
}

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Fixed command text with no untrusted parts, split on whitespace.
    pub fn fixed(command: &'static str) -> Self {
        Self::new(command.split_whitespace())
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The string the remote shell receives. Every element is quoted.
    pub fn to_shell(&self) -> String {
        shell::quote_args(&self.argv)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    /// Delay before retry N (index 0 is the first retry).
    pub retry_delays: Vec<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout_secs: 10,
            max_attempts: 3,
            retry_delays: vec![Duration::from_secs(2), Duration::from_secs(5)],
        }
    }
}

/// Runs commands on one remote host over ssh.
pub struct RemoteExecutor {
    pub host: String,
    pub options: SshOptions,
    runner: Arc<dyn CommandRunner>,
}

impl RemoteExecutor {
    pub fn new(host: impl Into<String>, options: SshOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            host: host.into(),
            options,
            runner,
        }
    }

    pub fn from_config(remote: &crate::config::RemoteConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let options = SshOptions {
            port: remote.port,
            connect_timeout_secs: remote.connect_timeout_secs,
            max_attempts: remote.max_attempts.max(1),
            ..SshOptions::default()
        };
        Self::new(remote.host.clone(), options, runner)
    }

    /// Execute `command` under a freshly acquired credential.
    ///
    /// The credential is released before this returns, on success and on error.
    pub fn execute(
        &self,
        command: &RemoteCommand,
        credentials: &dyn CredentialSource,
    ) -> Result<ExecutionResult> {
        with_credential(credentials, |scope| self.execute_scoped(command, scope))
    }

    fn execute_scoped(&self, command: &RemoteCommand, scope: &CredentialScope) -> Result<ExecutionResult> {
        let remote = command.to_shell();
        let spec = CommandSpec::new("ssh").args(self.build_ssh_args(scope, &remote));

        log_status!("ssh", "{}@{}: {}", scope.principal(), self.host, remote);
        let output = self.run_with_retry(&spec);

        if output.success {
            return Ok(ExecutionResult {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Err(classify_failure(&self.host, scope.principal(), &remote, output))
    }

    /// Argv for `ssh`: connect, no host-key prompt, batch mode, run, disconnect.
    pub fn build_ssh_args(&self, scope: &CredentialScope, remote_command: &str) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            scope.key_path().display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ];

        if self.options.port != 22 {
            args.push("-p".to_string());
            args.push(self.options.port.to_string());
        }

        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", scope.principal(), self.host));
        args.push(remote_command.to_string());
        args
    }

    fn run_with_retry(&self, spec: &CommandSpec) -> CommandOutput {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = self.runner.run(spec);
            attempt += 1;

            // Only retry on transient connection errors, not command failures
            if result.success || attempt >= max_attempts || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = self
                .options
                .retry_delays
                .get(attempt as usize - 1)
                .or(self.options.retry_delays.last())
                .copied()
                .unwrap_or_default();
            log_status!(
                "ssh",
                "Connection failed (attempt {}/{}), retrying in {}s...",
                attempt,
                max_attempts,
                delay.as_secs()
            );
            std::thread::sleep(delay);
        }
    }
}

/// Human-readable form of the invocation, matching what remote hosts expect:
/// `ssh -i <key> -o StrictHostKeyChecking=no <principal>@<host> '<command>'`.
pub fn render_invocation(key: &str, principal: &str, host: &str, command: &str) -> String {
    format!(
        "ssh -i {} -o StrictHostKeyChecking=no {}@{} {}",
        key,
        principal,
        host,
        shell::escape_command_for_shell(command)
    )
}

fn classify_failure(host: &str, principal: &str, command: &str, output: CommandOutput) -> Error {
    let lowered = output.stderr.to_lowercase();
    let exit_code = output.exit_code;
    let details = RemoteCommandFailedDetails {
        command: command.to_string(),
        exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        target: TargetDetails {
            host: Some(host.to_string()),
            principal: Some(principal.to_string()),
        },
    };

    // ssh itself exits 255; the remote command's status is passed through otherwise
    if exit_code == 255 || exit_code < 0 {
        if lowered.contains("permission denied") || lowered.contains("authentication failed") {
            return Error::ssh_auth_failed(details);
        }
        return Error::ssh_connect_failed(details);
    }

    Error::remote_command_failed(details)
}

/// Check if an SSH failure is a transient connection error worth retrying.
///
/// Only failures raised before the session is established count: once the
/// remote command may have started, re-issuing it is not safe.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "ssh_exchange_identification",
    ];

    output.exit_code == 255 && transient_patterns.iter().any(|p| stderr.contains(p))
}

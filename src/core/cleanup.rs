//! Remote docker cleanup.
//!
//! Tokens from the caller are parsed into [`CleanupKind`]. Recognized tokens
//! run their maintenance command on the remote host; anything else is logged
//! and skipped. A failing remote command is an error, an unknown token never is.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::credential::CredentialSource;
use crate::error::{Error, Result};
use crate::pipeline::{StageAction, StageContext, StageReport};
use crate::ssh::{ExecutionResult, RemoteCommand, RemoteExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupKind {
    Container,
    Image,
    Volume,
    All,
}

impl CleanupKind {
    pub const ALL_KINDS: [CleanupKind; 4] = [
        CleanupKind::Container,
        CleanupKind::Image,
        CleanupKind::Volume,
        CleanupKind::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupKind::Container => "container",
            CleanupKind::Image => "image",
            CleanupKind::Volume => "volume",
            CleanupKind::All => "all",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            CleanupKind::Container => "docker container prune -f",
            CleanupKind::Image => "docker image prune -a -f",
            CleanupKind::Volume => "docker volume prune -f",
            CleanupKind::All => "docker system prune -a --volumes -f",
        }
    }

    pub fn remote_command(&self) -> RemoteCommand {
        RemoteCommand::fixed(self.command())
    }
}

impl fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupKind {
    type Err = Error;

    /// Case-sensitive exact match.
    fn from_str(token: &str) -> Result<Self> {
        CleanupKind::ALL_KINDS
            .iter()
            .copied()
            .find(|kind| kind.as_str() == token)
            .ok_or_else(|| Error::cleanup_unrecognized_token(token))
    }
}

/// Split a comma-separated request. Surrounding whitespace is trimmed, empty
/// segments are dropped, duplicates are kept.
pub fn parse_request(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// One token's worth of planned work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStep {
    Run(CleanupKind),
    Skip(String),
}

pub fn plan(tokens: &[String]) -> Vec<CleanupStep> {
    tokens
        .iter()
        .map(|token| match token.parse::<CleanupKind>() {
            Ok(kind) => CleanupStep::Run(kind),
            Err(_) => CleanupStep::Skip(token.clone()),
        })
        .collect()
}

/// Dry-run lines: the remote command per step, a comment per skipped token.
pub fn describe(tokens: &[String]) -> Vec<String> {
    plan(tokens)
        .into_iter()
        .map(|step| match step {
            CleanupStep::Run(kind) => kind.command().to_string(),
            CleanupStep::Skip(token) => format!("# skip '{}' (invalid cleanup type)", token),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCommandResult {
    pub kind: CleanupKind,
    pub command: String,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub executed: Vec<CleanupCommandResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl CleanupReport {
    pub fn summary(&self) -> String {
        let ran: Vec<&str> = self.executed.iter().map(|c| c.kind.as_str()).collect();
        let mut summary = if ran.is_empty() {
            "no cleanup commands ran".to_string()
        } else {
            format!("cleaned {}", ran.join(", "))
        };
        if !self.skipped.is_empty() {
            summary.push_str(&format!("; skipped {}", self.skipped.join(", ")));
        }
        summary
    }
}

pub struct CleanupDispatcher<'a> {
    executor: &'a RemoteExecutor,
    credentials: &'a dyn CredentialSource,
}

impl<'a> CleanupDispatcher<'a> {
    pub fn new(executor: &'a RemoteExecutor, credentials: &'a dyn CredentialSource) -> Self {
        Self {
            executor,
            credentials,
        }
    }

    /// Process tokens in order. Returns `Err` at the first failing remote
    /// command; tokens after it are not processed.
    pub fn clean(&self, tokens: &[String]) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for step in plan(tokens) {
            match step {
                CleanupStep::Run(kind) => {
                    log_status!("cleanup", "Running {} cleanup on {}", kind, self.executor.host);
                    let result = self
                        .executor
                        .execute(&kind.remote_command(), self.credentials)?;
                    report.executed.push(CleanupCommandResult {
                        kind,
                        command: kind.command().to_string(),
                        result,
                    });
                }
                CleanupStep::Skip(token) => {
                    eprintln!("[cleanup] invalid cleanup type: '{}'. Skipping.", token);
                    report.skipped.push(token);
                }
            }
        }

        Ok(report)
    }
}

/// "Clean Docker Resources": the dispatcher as a pipeline stage.
pub struct CleanupStage {
    executor: Arc<RemoteExecutor>,
    credentials: Arc<dyn CredentialSource>,
    tokens: Vec<String>,
}

impl CleanupStage {
    pub fn new(
        executor: Arc<RemoteExecutor>,
        credentials: Arc<dyn CredentialSource>,
        tokens: Vec<String>,
    ) -> Self {
        Self {
            executor,
            credentials,
            tokens,
        }
    }
}

impl StageAction for CleanupStage {
    fn run(&self, _ctx: &StageContext<'_>) -> Result<StageReport> {
        let report = CleanupDispatcher::new(&self.executor, self.credentials.as_ref()).clean(&self.tokens)?;
        let data = serde_json::to_value(&report)
            .map_err(|e| Error::internal_json(e.to_string(), Some("cleanup report".to_string())))?;
        Ok(StageReport::summary(report.summary()).with_data(data))
    }

    fn describe(&self) -> Vec<String> {
        describe(&self.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretRef;
    use crate::credential::ConfiguredCredential;
    use crate::ssh::SshOptions;
    use crate::utils::command::fake::ScriptedRunner;
    use crate::utils::command::CommandOutput;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct Fixture {
        runner: Arc<ScriptedRunner>,
        executor: RemoteExecutor,
        credential: ConfiguredCredential,
        _key: NamedTempFile,
    }

    fn fixture(replies: Vec<CommandOutput>) -> Fixture {
        let key = NamedTempFile::new().unwrap();
        let runner = Arc::new(ScriptedRunner::replying(replies));
        let options = SshOptions {
            retry_delays: vec![Duration::ZERO],
            ..SshOptions::default()
        };
        Fixture {
            executor: RemoteExecutor::new("docker-host", options, runner.clone()),
            runner,
            credential: ConfiguredCredential::new(
                "deploy",
                SecretRef::File {
                    path: key.path().display().to_string(),
                },
            ),
            _key: key,
        }
    }

    fn remote_commands(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .calls()
            .iter()
            .map(|spec| spec.args.last().cloned().unwrap_or_default())
            .collect()
    }

    #[test]
    fn parse_is_exact_and_case_sensitive() {
        assert_eq!("volume".parse::<CleanupKind>().unwrap(), CleanupKind::Volume);
        assert!("Volume".parse::<CleanupKind>().is_err());
        assert!(" all".parse::<CleanupKind>().is_err());

        let err = "bogus".parse::<CleanupKind>().unwrap_err();
        assert_eq!(err.code.as_str(), "cleanup.unrecognized_token");
    }

    #[test]
    fn mapping_is_total() {
        for kind in CleanupKind::ALL_KINDS {
            assert!(kind.command().starts_with("docker "));
            assert_eq!(kind.as_str().parse::<CleanupKind>().unwrap(), kind);
        }
    }

    #[test]
    fn parse_request_trims_and_keeps_duplicates() {
        assert_eq!(
            parse_request(" container, ,image,container,"),
            vec!["container", "image", "container"]
        );
    }

    #[test]
    fn every_subset_in_any_order_issues_one_command_per_token() {
        let kinds = CleanupKind::ALL_KINDS;
        for mask in 1u8..16 {
            let mut subset: Vec<CleanupKind> = kinds
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| *k)
                .collect();
            for reversed in [false, true] {
                if reversed {
                    subset.reverse();
                }
                let f = fixture(Vec::new());
                let tokens: Vec<String> = subset.iter().map(|k| k.as_str().to_string()).collect();

                let report = CleanupDispatcher::new(&f.executor, &f.credential)
                    .clean(&tokens)
                    .unwrap();

                let expected: Vec<String> = subset.iter().map(|k| k.command().to_string()).collect();
                assert_eq!(remote_commands(&f.runner), expected);
                assert_eq!(report.executed.len(), subset.len());
                assert!(report.skipped.is_empty());
            }
        }
    }

    #[test]
    fn unknown_tokens_are_skipped_without_commands() {
        let f = fixture(Vec::new());
        let tokens = parse_request("container,bogus,volume");

        let report = CleanupDispatcher::new(&f.executor, &f.credential)
            .clean(&tokens)
            .unwrap();

        assert_eq!(
            remote_commands(&f.runner),
            vec!["docker container prune -f", "docker volume prune -f"]
        );
        assert_eq!(report.skipped, vec!["bogus"]);
        assert_eq!(report.summary(), "cleaned container, volume; skipped bogus");
    }

    #[test]
    fn only_unknown_tokens_is_still_ok() {
        let f = fixture(Vec::new());
        let report = CleanupDispatcher::new(&f.executor, &f.credential)
            .clean(&["IMAGE".to_string(), "prune".to_string()])
            .unwrap();
        assert!(f.runner.calls().is_empty());
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn remote_failure_stops_and_errors() {
        let f = fixture(vec![
            CommandOutput::ok(""),
            CommandOutput::failed(1, "daemon not running"),
        ]);
        let tokens = parse_request("container,image,volume");

        let err = CleanupDispatcher::new(&f.executor, &f.credential)
            .clean(&tokens)
            .unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert_eq!(f.runner.calls().len(), 2);
    }

    #[test]
    fn duplicates_run_twice() {
        let f = fixture(Vec::new());
        CleanupDispatcher::new(&f.executor, &f.credential)
            .clean(&parse_request("volume,volume"))
            .unwrap();
        assert_eq!(f.runner.calls().len(), 2);
    }

    #[test]
    fn stage_soft_skip_reports_success() {
        let f = fixture(Vec::new());
        let stage = CleanupStage::new(
            Arc::new(f.executor),
            Arc::new(f.credential),
            parse_request("container,bogus,volume"),
        );
        let ctx = StageContext {
            run_id: "run",
            stage: "Clean Docker Resources",
            ordinal: 5,
        };

        let report = stage.run(&ctx).unwrap();

        assert_eq!(f.runner.calls().len(), 2);
        assert_eq!(report.data.unwrap()["skipped"][0], "bogus");
        assert_eq!(
            stage.describe(),
            vec![
                "docker container prune -f",
                "# skip 'bogus' (invalid cleanup type)",
                "docker volume prune -f",
            ]
        );
    }
}

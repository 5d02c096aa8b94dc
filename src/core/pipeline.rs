//! Linear stage execution.
//!
//! Stages run strictly in declared order. The first failure stops the run;
//! stages after it are never attempted and get no outcome record. A
//! [`Finalizer`] wraps the run so its hook fires exactly once when the stage
//! loop is left, whichever way that happens.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failure,
    #[default]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

/// What a stage hands back on success.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StageReport {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub stage: &'a str,
    pub ordinal: usize,
}

pub trait StageAction: Send {
    fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport>;

    /// Commands this stage would issue, for plans and dry runs.
    fn describe(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> StageAction for F
where
    F: Fn(&StageContext<'_>) -> Result<StageReport> + Send,
{
    fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        self(ctx)
    }
}

pub struct Stage {
    pub name: String,
    pub ordinal: usize,
    action: Box<dyn StageAction>,
}

impl Stage {
    pub fn describe(&self) -> Vec<String> {
        self.action.describe()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

/// Ordered stage list; ordinals follow insertion order.
#[derive(Debug, Default)]
pub struct StageList {
    stages: Vec<Stage>,
}

impl StageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, name: impl Into<String>, action: impl StageAction + 'static) -> Self {
        self.push(name, action);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, action: impl StageAction + 'static) {
        let ordinal = self.stages.len();
        self.stages.push(Stage {
            name: name.into(),
            ordinal,
            action: Box::new(action),
        });
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn into_vec(self) -> Vec<Stage> {
        self.stages
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    pub name: String,
    pub ordinal: usize,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    pub stage: String,
    pub ordinal: usize,
    pub cause: Error,
}

impl StageFailure {
    pub fn into_error(self) -> Error {
        Error::stage_failed(&self.stage, self.ordinal, &self.cause)
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub run_id: String,
    pub job_name: String,
    pub run_number: u64,
    #[serde(skip)]
    pub stages: Vec<Stage>,
    pub status: RunStatus,
    pub outcomes: Vec<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(job_name: impl Into<String>, run_number: u64, stages: StageList) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            job_name: job_name.into(),
            run_number,
            stages: stages.into_vec(),
            ..Self::default()
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn failed_stage(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.stage.as_str())
    }
}

/// Shared flag checked at every stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns a run and fires its hook once when finished or dropped.
///
/// Dropping without `finish` (for example while unwinding from a panicking
/// stage) still fires the hook, with whatever status the run had.
pub struct Finalizer<F: FnOnce(&PipelineRun)> {
    run: Option<PipelineRun>,
    hook: Option<F>,
}

impl<F: FnOnce(&PipelineRun)> Finalizer<F> {
    pub fn new(run: PipelineRun, hook: F) -> Self {
        Self {
            run: Some(run),
            hook: Some(hook),
        }
    }

    pub fn run_mut(&mut self) -> Option<&mut PipelineRun> {
        self.run.as_mut()
    }

    pub fn finish(mut self) -> PipelineRun {
        self.fire();
        self.run.take().unwrap_or_default()
    }

    fn fire(&mut self) {
        if let (Some(hook), Some(run)) = (self.hook.take(), self.run.as_mut()) {
            run.finished_at = Some(Utc::now());
            hook(run);
        }
    }
}

impl<F: FnOnce(&PipelineRun)> Drop for Finalizer<F> {
    fn drop(&mut self) {
        self.fire();
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    cancel: CancelToken,
}

impl StageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every stage, then fire `finalize` exactly once.
    pub fn run_with_finalizer<F>(&self, run: PipelineRun, finalize: F) -> PipelineRun
    where
        F: FnOnce(&PipelineRun),
    {
        let mut guard = Finalizer::new(run, finalize);
        if let Some(run) = guard.run_mut() {
            self.execute(run);
        }
        guard.finish()
    }

    /// Run every stage without a finalization hook.
    pub fn run(&self, run: PipelineRun) -> PipelineRun {
        self.run_with_finalizer(run, |_| {})
    }

    fn execute(&self, run: &mut PipelineRun) {
        run.started_at = Some(Utc::now());
        let total = run.stages.len();

        for stage in &run.stages {
            if self.cancel.is_cancelled() {
                log_status!("pipeline", "Cancelled before '{}'", stage.name);
                run.cancelled = true;
                run.failure = Some(StageFailure {
                    stage: stage.name.clone(),
                    ordinal: stage.ordinal,
                    cause: Error::pipeline_cancelled(Some(&stage.name)),
                });
                run.status = RunStatus::Failure;
                return;
            }

            log_status!("pipeline", "[{}/{}] {}", stage.ordinal + 1, total, stage.name);
            let ctx = StageContext {
                run_id: &run.run_id,
                stage: &stage.name,
                ordinal: stage.ordinal,
            };
            let started = Instant::now();
            let result = stage.action.run(&ctx);
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(report) => run.outcomes.push(StageOutcome {
                    name: stage.name.clone(),
                    ordinal: stage.ordinal,
                    status: StageStatus::Succeeded,
                    duration_ms,
                    summary: report.summary,
                    artifact: report.artifact,
                    data: report.data,
                }),
                Err(cause) => {
                    log_status!("pipeline", "'{}' failed: {}", stage.name, cause);
                    run.outcomes.push(StageOutcome {
                        name: stage.name.clone(),
                        ordinal: stage.ordinal,
                        status: StageStatus::Failed,
                        duration_ms,
                        summary: Some(cause.message.clone()),
                        artifact: None,
                        data: None,
                    });
                    run.failure = Some(StageFailure {
                        stage: stage.name.clone(),
                        ordinal: stage.ordinal,
                        cause,
                    });
                    run.status = RunStatus::Failure;
                    return;
                }
            }
        }

        run.status = RunStatus::Success;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &str, fail: bool) -> impl StageAction {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |_: &StageContext<'_>| {
            log.lock().unwrap().push(name.clone());
            if fail {
                Err(Error::internal_unexpected(format!("{} broke", name)))
            } else {
                Ok(StageReport::summary(format!("{} ok", name)))
            }
        }
    }

    fn six_stages(log: &Arc<Mutex<Vec<String>>>, fail_at: Option<usize>) -> StageList {
        let mut list = StageList::new();
        for i in 0..6 {
            let name = format!("stage-{}", i + 1);
            list.push(name.clone(), recording(log, &name, Some(i) == fail_at));
        }
        list
    }

    #[test]
    fn all_stages_succeed_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = PipelineRun::new("shop", 7, six_stages(&log, None));

        let run = StageRunner::new().run(run);

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outcomes.len(), 6);
        let names: Vec<&str> = run.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, run.stage_names());
        assert!(run.outcomes.iter().all(|o| o.status == StageStatus::Succeeded));
        assert!(run.failure.is_none());
    }

    #[test]
    fn first_failure_stops_the_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = PipelineRun::new("shop", 7, six_stages(&log, Some(2)));

        let run = StageRunner::new().run(run);

        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(*log.lock().unwrap(), vec!["stage-1", "stage-2", "stage-3"]);
        assert_eq!(run.outcomes.len(), 3);
        assert_eq!(run.outcomes[2].status, StageStatus::Failed);
        assert_eq!(run.failed_stage(), Some("stage-3"));
        assert_eq!(
            run.failure.as_ref().unwrap().cause.message,
            "Unexpected error: stage-3 broke"
        );
    }

    #[test]
    fn finalizer_fires_once_after_abort() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = PipelineRun::new("shop", 7, six_stages(&log, Some(2)));
        let fired = Cell::new(0);
        let mut seen = None;

        let run = StageRunner::new().run_with_finalizer(run, |run| {
            fired.set(fired.get() + 1);
            seen = Some(run.status);
        });

        assert_eq!(fired.get(), 1);
        assert_eq!(seen, Some(RunStatus::Failure));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn finalizer_fires_once_after_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = PipelineRun::new("shop", 7, six_stages(&log, None));
        let fired = Cell::new(0);

        StageRunner::new().run_with_finalizer(run, |run| {
            assert_eq!(run.status, RunStatus::Success);
            fired.set(fired.get() + 1);
        });

        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn finalizer_fires_when_a_stage_panics() {
        let fired = Arc::new(Mutex::new(None));
        let fired_in_hook = Arc::clone(&fired);

        let result = std::panic::catch_unwind(move || {
            let stages = StageList::new().stage("explode", |_: &StageContext<'_>| -> Result<StageReport> {
                panic!("stage panicked")
            });
            let run = PipelineRun::new("shop", 1, stages);
            StageRunner::new().run_with_finalizer(run, move |run| {
                *fired_in_hook.lock().unwrap() = Some(run.status);
            });
        });

        assert!(result.is_err());
        assert_eq!(*fired.lock().unwrap(), Some(RunStatus::Unknown));
    }

    #[test]
    fn cancellation_is_honored_at_stage_boundary() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let mut stages = StageList::new();
        stages.push("first", recording(&log, "first", false));
        stages.push("cancel", move |_: &StageContext<'_>| {
            trigger.cancel();
            Ok(StageReport::default())
        });
        stages.push("never", recording(&log, "never", false));

        let run = StageRunner::with_cancel(cancel).run(PipelineRun::new("shop", 1, stages));

        assert_eq!(run.status, RunStatus::Failure);
        assert!(run.cancelled);
        assert_eq!(run.outcomes.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, "never");
        assert_eq!(failure.cause.code.as_str(), "pipeline.cancelled");
    }

    #[test]
    fn empty_run_is_success() {
        let run = StageRunner::new().run(PipelineRun::new("shop", 1, StageList::new()));
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.outcomes.is_empty());
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(RunStatus::Failure).unwrap(), "FAILURE");
        assert_eq!(RunStatus::Unknown.to_string(), "UNKNOWN");
    }
}

//! Upload pipeline orchestration.
//!
//! The pipeline is an explicit state machine:
//!
//! ```text
//! Provisioning -> Commit -> Report -> StaticAnalysis -> LabelAnalysis -> Cleanup -> Done
//!       \____________\________\___________\__________________\______________\--> Failed
//! ```
//!
//! Each stage runs at most once and only if the previous one exited 0.
//! Provisioning and commit failures are hard; later stage failures are soft
//! and only stop the chain. Once the uploader is on disk, every path goes
//! through `Cleanup` before terminating.

use crate::args::{
    build_commit, build_label_analysis, build_report, build_static_analysis, LabelAnalysisPlan,
};
use crate::config::{GeneralArgs, UploaderConfig};
use crate::context::CiContext;
use crate::export::{VariableExporter, TESTS_TO_RUN_VAR};
use crate::provision::{BinaryProvisioner, Platform};
use crate::runner::{StageOutput, StageRunner};
use crate::stage::{StageCommand, StageInvocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Prefix the uploader puts in front of the label-analysis selection.
pub const TESTS_TO_RUN_PREFIX: &str = "ATS_TESTS_TO_RUN=";

/// States of the upload pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Provisioning,
    Commit,
    Report,
    StaticAnalysis,
    LabelAnalysis,
    Cleanup,
    Done,
    Failed,
}

impl Phase {
    fn stage(command: StageCommand) -> Self {
        match command {
            StageCommand::Commit => Phase::Commit,
            StageCommand::Report => Phase::Report,
            StageCommand::StaticAnalysis => Phase::StaticAnalysis,
            StageCommand::LabelAnalysis => Phase::LabelAnalysis,
        }
    }
}

/// How a failure affects the CI job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Fails the job when `fail_ci_if_error` is set.
    Hard,

    /// Logged as a warning; never fails the job.
    Soft,
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Every stage exited 0 and label analysis produced a selection.
    Completed,

    /// No base commit yielded labels; the exported selection is empty (run all tests).
    LabelsDefaulted,

    /// A phase failed and the chain stopped there.
    StageFailed {
        phase: Phase,
        severity: Severity,
        message: String,
    },
}

/// One uploader invocation as it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub command: StageCommand,

    /// Base commit tried, for label analysis.
    pub base_sha: Option<String>,

    /// `None` if the process never ran.
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    pub error: Option<String>,
}

impl StageRecord {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub outcome: PipelineOutcome,

    /// Last state reached, `Done` or `Failed`.
    pub final_phase: Phase,

    /// Invocations in execution order.
    pub stages: Vec<StageRecord>,

    /// Exported test selection, when label analysis ran.
    pub tests_to_run: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self.outcome,
            PipelineOutcome::StageFailed {
                severity: Severity::Hard,
                ..
            }
        )
    }

    /// Process exit status: non-zero only for hard failures with `fail_ci` set.
    pub fn exit_code(&self, fail_ci: bool) -> i32 {
        if fail_ci && self.is_hard_failure() {
            1
        } else {
            0
        }
    }

    /// Number of invocations that exited 0.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of invocations that did not exit 0.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }
}

/// Strip the selection prefix and every double quote from label-analysis output.
pub fn extract_tests_to_run(captured: &str) -> String {
    captured.replacen(TESTS_TO_RUN_PREFIX, "", 1).replace('"', "")
}

/// Mutable bookkeeping for a single run; consumed by [`RunState::finish`].
struct RunState {
    started_at: DateTime<Utc>,
    start: Instant,
    fail_ci: bool,
    stages: Vec<StageRecord>,
    failure: Option<(Phase, Severity, String)>,
    tests_to_run: Option<String>,
    labels_defaulted: bool,
}

impl RunState {
    fn new(fail_ci: bool) -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            fail_ci,
            stages: Vec::new(),
            failure: None,
            tests_to_run: None,
            labels_defaulted: false,
        }
    }

    /// Record a failure. The first one wins unless a hard failure follows a
    /// soft one; everything else is only logged.
    fn fail(&mut self, phase: Phase, severity: Severity, message: String) {
        if severity == Severity::Hard && self.fail_ci {
            error!(?phase, "Codecov: {}", message);
        } else {
            warn!(?phase, "Codecov: {}", message);
        }
        let escalates = match &self.failure {
            None => true,
            Some((_, existing, _)) => *existing == Severity::Soft && severity == Severity::Hard,
        };
        if escalates {
            self.failure = Some((phase, severity, message));
        }
    }

    fn has_hard_failure(&self) -> bool {
        matches!(self.failure, Some((_, Severity::Hard, _)))
    }

    fn finish(self, final_phase: Phase) -> PipelineResult {
        let outcome = match self.failure {
            Some((phase, severity, message)) => PipelineOutcome::StageFailed {
                phase,
                severity,
                message,
            },
            None if self.labels_defaulted => PipelineOutcome::LabelsDefaulted,
            None => PipelineOutcome::Completed,
        };

        PipelineResult {
            outcome,
            final_phase,
            stages: self.stages,
            tests_to_run: self.tests_to_run,
            started_at: self.started_at,
            duration_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

/// Drives the uploader through the fixed stage sequence.
pub struct UploadPipeline {
    provisioner: Arc<dyn BinaryProvisioner>,
    runner: Arc<dyn StageRunner>,
    exporter: Arc<dyn VariableExporter>,
}

impl UploadPipeline {
    pub fn new(
        provisioner: Arc<dyn BinaryProvisioner>,
        runner: Arc<dyn StageRunner>,
        exporter: Arc<dyn VariableExporter>,
    ) -> Self {
        Self {
            provisioner,
            runner,
            exporter,
        }
    }

    /// Run the whole pipeline. Never returns an error: every failure is folded
    /// into the result's outcome.
    pub async fn run(&self, config: &UploaderConfig, ci: &CiContext) -> PipelineResult {
        let general = GeneralArgs::from_config(config);
        let mut state = RunState::new(general.fail_ci);
        let mut binary: Option<PathBuf> = None;
        let mut phase = Phase::Provisioning;

        info!("Starting Codecov upload pipeline");

        loop {
            debug!(?phase, "Entering phase");
            phase = match phase {
                Phase::Provisioning => {
                    let platform = Platform::resolve(general.os.as_deref());
                    match self
                        .provisioner
                        .provision(platform, &general.uploader_version)
                        .await
                    {
                        Ok(path) => {
                            binary = Some(path);
                            Phase::Commit
                        }
                        Err(e) => {
                            state.fail(
                                Phase::Provisioning,
                                Severity::Hard,
                                format!("Failed to provision uploader binary: {}", e),
                            );
                            Phase::Failed
                        }
                    }
                }
                Phase::Commit | Phase::Report | Phase::StaticAnalysis => {
                    let Some(path) = binary.as_deref() else {
                        break;
                    };
                    let (invocation, severity, next) = match phase {
                        Phase::Commit => (build_commit(config, ci), Severity::Hard, Phase::Report),
                        Phase::Report => (
                            build_report(config, ci),
                            Severity::Soft,
                            Phase::StaticAnalysis,
                        ),
                        _ => (
                            build_static_analysis(config, ci),
                            Severity::Soft,
                            Phase::LabelAnalysis,
                        ),
                    };
                    if self.run_gated(path, &invocation, severity, &mut state).await {
                        next
                    } else {
                        Phase::Cleanup
                    }
                }
                Phase::LabelAnalysis => {
                    if let Some(path) = binary.as_deref() {
                        let plan = build_label_analysis(config, ci);
                        self.label_analysis(path, &plan, &mut state).await;
                    }
                    Phase::Cleanup
                }
                Phase::Cleanup => {
                    if let Some(path) = binary.take() {
                        remove_uploader(&path, &mut state).await;
                    }
                    if state.has_hard_failure() {
                        Phase::Failed
                    } else {
                        Phase::Done
                    }
                }
                Phase::Done | Phase::Failed => break,
            };
        }

        let result = state.finish(phase);
        match &result.outcome {
            PipelineOutcome::Completed => info!("Codecov upload pipeline completed"),
            PipelineOutcome::LabelsDefaulted => {
                info!("Codecov upload pipeline completed without a test selection")
            }
            PipelineOutcome::StageFailed { phase, severity, .. } => {
                info!(?phase, ?severity, "Codecov upload pipeline stopped early")
            }
        }
        result
    }

    /// Run one gated stage. Returns whether the chain may continue.
    async fn run_gated(
        &self,
        binary: &Path,
        invocation: &StageInvocation,
        severity: Severity,
        state: &mut RunState,
    ) -> bool {
        let command = invocation.command;
        let phase = Phase::stage(command);
        info!(stage = %command, "Executing stage");

        match self.runner.run(binary, invocation).await {
            Ok(output) => {
                state.stages.push(record(command, None, &output));
                if output.passed() {
                    true
                } else {
                    state.fail(
                        phase,
                        severity,
                        format!("Stage {} exited with code {}", command, output.exit_code),
                    );
                    false
                }
            }
            Err(e) => {
                state.stages.push(spawn_record(command, None, &e.to_string()));
                state.fail(
                    phase,
                    severity,
                    format!("Failed to properly run {}: {}", command, e),
                );
                false
            }
        }
    }

    /// Try each base commit until one yields labels; default to "run all tests".
    async fn label_analysis(&self, binary: &Path, plan: &LabelAnalysisPlan, state: &mut RunState) {
        let command = StageCommand::LabelAnalysis;
        info!(stage = %command, candidates = ?plan.base_commits, "Executing stage");

        for base_sha in &plan.base_commits {
            if base_sha.is_empty() {
                debug!(stage = %command, "Skipping empty base commit");
                continue;
            }
            info!(stage = %command, base_sha = %base_sha, "Trying base commit");

            let invocation = plan.invocation.with_base_sha(base_sha);
            match self.runner.run(binary, &invocation).await {
                Ok(output) => {
                    state
                        .stages
                        .push(record(command, Some(base_sha.as_str()), &output));
                    if output.passed() {
                        let captured = output.stdout.as_deref().unwrap_or_default();
                        let tests = extract_tests_to_run(captured);
                        self.publish_tests(&tests, &plan.test_output_path);
                        state.tests_to_run = Some(tests);
                        return;
                    }
                    warn!(
                        stage = %command,
                        base_sha = %base_sha,
                        exit_code = output.exit_code,
                        "Codecov: Label analysis exited with a non-zero code"
                    );
                }
                Err(e) => {
                    state
                        .stages
                        .push(spawn_record(command, Some(base_sha.as_str()), &e.to_string()));
                    warn!(
                        stage = %command,
                        base_sha = %base_sha,
                        "Codecov: Failed to properly retrieve labels: {}", e
                    );
                }
            }
        }

        info!(
            "Codecov: Could not find labels from commits: {:?} Defaulting to run all tests.",
            plan.base_commits
        );
        self.export_tests("");
        state.tests_to_run = Some(String::new());
        state.labels_defaulted = true;
    }

    fn publish_tests(&self, tests: &str, output_path: &Path) {
        self.export_tests(tests);
        if let Err(e) = std::fs::write(output_path, tests) {
            warn!(
                path = %output_path.display(),
                "Codecov: Could not write label analysis output: {}", e
            );
        }
    }

    fn export_tests(&self, tests: &str) {
        if let Err(e) = self.exporter.export(TESTS_TO_RUN_VAR, tests) {
            warn!("Codecov: Could not export {}: {}", TESTS_TO_RUN_VAR, e);
        }
    }
}

fn record(command: StageCommand, base_sha: Option<&str>, output: &StageOutput) -> StageRecord {
    StageRecord {
        command,
        base_sha: base_sha.map(str::to_string),
        exit_code: Some(output.exit_code),
        duration_ms: output.duration_ms,
        error: None,
    }
}

fn spawn_record(command: StageCommand, base_sha: Option<&str>, error: &str) -> StageRecord {
    StageRecord {
        command,
        base_sha: base_sha.map(str::to_string),
        exit_code: None,
        duration_ms: 0,
        error: Some(error.to_string()),
    }
}

async fn remove_uploader(path: &Path, state: &mut RunState) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed uploader"),
        Err(e) => state.fail(
            Phase::Cleanup,
            Severity::Hard,
            format!("Could not unlink uploader: {}", e),
        ),
    }
}

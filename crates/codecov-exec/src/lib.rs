//! Codecov uploader orchestration
//!
//! Provisions the Codecov uploader binary and drives it through the fixed
//! stage sequence:
//! - `create-commit`
//! - `create-report`
//! - `static-analysis`
//! - `label-analysis`, exporting the selected tests for later CI steps
//!
//! Argument construction is pure ([`args`]); process execution, downloads and
//! variable export sit behind traits so the [`UploadPipeline`] can be driven
//! with the [`fakes`] in tests.

pub mod args;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod fakes;
pub mod pipeline;
pub mod provision;
pub mod runner;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use args::LabelAnalysisPlan;
pub use config::{is_true, GeneralArgs, UploaderConfig};
pub use context::{CiContext, EventKind, RunIdentity};
pub use error::{CodecovError, Result};
pub use export::{GithubEnvExporter, VariableExporter, TESTS_TO_RUN_VAR};
pub use pipeline::{
    extract_tests_to_run, Phase, PipelineOutcome, PipelineResult, Severity, StageRecord,
    UploadPipeline,
};
pub use provision::{BinaryProvisioner, HttpProvisioner, Platform};
pub use runner::{ProcessRunner, StageOutput, StageRunner};
pub use stage::{EnvOverlay, StageCommand, StageInvocation};
pub use telemetry::init_tracing;

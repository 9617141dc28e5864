//! codecov-exec - Codecov uploader pipeline CLI
//!
//! Downloads the Codecov uploader and runs `create-commit`, `create-report`,
//! `static-analysis` and `label-analysis` against the current checkout.
//!
//! Every input can be given as a flag or through the `INPUT_<NAME>` variable a
//! GitHub Actions runner sets for action inputs.

use anyhow::{Context, Result};
use clap::{Args, Parser};
use codecov_exec::{
    init_tracing, CiContext, GeneralArgs, GithubEnvExporter, HttpProvisioner, PipelineResult,
    ProcessRunner, UploadPipeline, UploaderConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "codecov-exec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Upload coverage and test-impact data with the Codecov uploader", long_about = None)]
struct Cli {
    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Directory the uploader is downloaded into (default: $RUNNER_TEMP or the system temp dir)
    #[arg(long, env = "RUNNER_TEMP")]
    install_dir: Option<PathBuf>,

    /// Download the uploader from this base URL instead of the public bucket
    #[arg(long)]
    download_base_url: Option<String>,

    /// Print the pipeline result as JSON on stdout
    #[arg(long)]
    summary_json: bool,

    #[command(flatten)]
    inputs: Inputs,
}

/// Action inputs.
#[derive(Args, Debug)]
struct Inputs {
    /// SHA of the parent commit
    #[arg(long, env = "INPUT_COMMIT_PARENT")]
    commit_parent: Option<String>,

    /// Branch to report against
    #[arg(long, env = "INPUT_OVERRIDE_BRANCH")]
    override_branch: Option<String>,

    /// Commit SHA to report against
    #[arg(long, env = "INPUT_OVERRIDE_COMMIT")]
    override_commit: Option<String>,

    /// Pull request number
    #[arg(long, env = "INPUT_OVERRIDE_PR")]
    override_pr: Option<String>,

    /// Repository slug (owner/repo)
    #[arg(long, env = "INPUT_SLUG")]
    slug: Option<String>,

    /// Upload token
    #[arg(long, env = "INPUT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Fail the job when the uploader fails
    #[arg(long, env = "INPUT_FAIL_CI_IF_ERROR")]
    fail_ci_if_error: Option<String>,

    /// Uploader platform (alpine, linux, linux-arm64, macos, windows, aarch64)
    #[arg(long, env = "INPUT_OS")]
    os: Option<String>,

    /// Self-hosted Codecov URL
    #[arg(long, env = "INPUT_URL")]
    url: Option<String>,

    /// Verbose uploader and log output
    #[arg(long, env = "INPUT_VERBOSE")]
    verbose: Option<String>,

    /// Uploader version (default: latest)
    #[arg(long, env = "INPUT_VERSION")]
    uploader_version: Option<String>,

    /// Static analysis file pattern
    #[arg(long, env = "INPUT_FILE_PATTERN")]
    file_pattern: Option<String>,

    /// Folders excluded from static analysis
    #[arg(long, env = "INPUT_FOLDERS_TO_EXCLUDE")]
    folders_to_exclude: Option<String>,

    /// Force static analysis upload
    #[arg(long, env = "INPUT_FORCE")]
    force: Option<String>,

    /// Static analysis token
    #[arg(long, env = "INPUT_STATIC_TOKEN", hide_env_values = true)]
    static_token: Option<String>,

    /// Base commit for label analysis
    #[arg(long, env = "INPUT_OVERRIDE_BASE_COMMIT")]
    override_base_commit: Option<String>,

    /// Maximum time label analysis waits for results
    #[arg(long, env = "INPUT_MAX_WAIT_TIME")]
    max_wait_time: Option<String>,

    /// File the selected tests are written to
    #[arg(long, env = "INPUT_TEST_OUTPUT_PATH")]
    test_output_path: Option<String>,

    /// Directory the uploader runs in
    #[arg(long, env = "INPUT_WORKING_DIRECTORY")]
    working_directory: Option<PathBuf>,

    /// Skip uploader checksum validation
    #[arg(long, env = "INPUT_SKIP_VALIDATION")]
    skip_validation: Option<String>,
}

impl From<Inputs> for UploaderConfig {
    fn from(inputs: Inputs) -> Self {
        UploaderConfig {
            commit_parent: inputs.commit_parent,
            override_branch: inputs.override_branch,
            override_commit: inputs.override_commit,
            override_pr: inputs.override_pr,
            slug: inputs.slug,
            token: inputs.token,
            fail_ci_if_error: inputs.fail_ci_if_error,
            os: inputs.os,
            url: inputs.url,
            verbose: inputs.verbose,
            version: inputs.uploader_version,
            file_pattern: inputs.file_pattern,
            folders_to_exclude: inputs.folders_to_exclude,
            force: inputs.force,
            static_token: inputs.static_token,
            override_base_commit: inputs.override_base_commit,
            max_wait_time: inputs.max_wait_time,
            test_output_path: inputs.test_output_path,
            working_directory: inputs.working_directory,
            skip_validation: inputs.skip_validation,
        }
        .normalized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = UploaderConfig::from(cli.inputs);

    // Setup logging
    let level = if config.is_verbose() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let fail_ci = config.fail_ci();
    let install_dir = cli
        .install_dir
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(std::env::temp_dir);

    let result = match run(&config, install_dir, cli.download_base_url.as_deref()).await {
        Ok(result) => result,
        Err(e) => return unexpected_error(e, fail_ci),
    };

    if cli.summary_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    print_summary(&result);

    let code = result.exit_code(fail_ci);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Errors raised before the pipeline starts follow the same fail-CI policy.
fn unexpected_error(e: anyhow::Error, fail_ci: bool) -> Result<()> {
    let message = format!("Codecov: Encountered an unexpected error {:#}", e);
    if fail_ci {
        error!("{}", message);
        return Err(e);
    }
    warn!("{}", message);
    Ok(())
}

async fn run(
    config: &UploaderConfig,
    install_dir: PathBuf,
    download_base_url: Option<&str>,
) -> Result<PipelineResult> {
    let ci = CiContext::from_env()
        .context("Failed to read CI context")?
        .with_parent_commit_from_git(config.working_directory.as_deref())
        .await;
    info!(event = ?ci.event, "Loaded CI context");

    let mut provisioner = HttpProvisioner::new(install_dir)
        .context("Failed to create HTTP client")?
        .skip_validation(config.skip_validation());
    if let Some(base_url) = download_base_url {
        provisioner = provisioner.with_base_url(base_url);
    }

    let general = GeneralArgs::from_config(config);
    let pipeline = UploadPipeline::new(
        Arc::new(provisioner),
        Arc::new(ProcessRunner::new(general.args)),
        Arc::new(GithubEnvExporter::from_env()),
    );

    Ok(pipeline.run(config, &ci).await)
}

fn print_summary(result: &PipelineResult) {
    info!(
        outcome = ?result.outcome,
        duration_ms = result.duration_ms,
        "Pipeline finished"
    );
    for stage in &result.stages {
        let status = if stage.passed() { "✓" } else { "✗" };
        let base = stage
            .base_sha
            .as_deref()
            .map(|sha| format!(" (base {})", sha))
            .unwrap_or_default();
        match (stage.exit_code, &stage.error) {
            (Some(code), _) => info!(
                "  {} {}{} ({}ms, exit code: {})",
                status, stage.command, base, stage.duration_ms, code
            ),
            (None, Some(err)) => info!("  {} {}{}: {}", status, stage.command, base, err),
            (None, None) => info!("  {} {}{}", status, stage.command, base),
        }
    }
}

//! Uploader stage execution.

use crate::error::CodecovError;
use crate::stage::StageInvocation;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

/// Result of one uploader invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    /// Exit code (0 = success, -1 = terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout, present only when the invocation asked for it.
    pub stdout: Option<String>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageOutput {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes a single stage invocation against the provisioned uploader.
///
/// Implementations report exit codes as-is; deciding what a non-zero code
/// means is the pipeline's job. Only spawn-level problems are errors.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, binary: &Path, invocation: &StageInvocation) -> Result<StageOutput>;
}

/// Runs the uploader as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Global flags placed before the command keyword.
    general_args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(general_args: Vec<String>) -> Self {
        Self { general_args }
    }

    /// Full argument vector: global flags, command keyword, stage arguments.
    pub fn command_line(&self, invocation: &StageInvocation) -> Vec<String> {
        let mut line = self.general_args.clone();
        line.push(invocation.command.keyword().to_string());
        line.extend(invocation.args.iter().cloned());
        line
    }
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(&self, binary: &Path, invocation: &StageInvocation) -> Result<StageOutput> {
        let start = Instant::now();
        let args = self.command_line(invocation);
        info!(stage = %invocation.command, "Running {} {}", binary.display(), args.join(" "));
        debug!(stage = %invocation.command, env = ?invocation.env, "Stage environment");

        let mut command = Command::new(binary);
        command
            .args(&args)
            .envs(invocation.env.iter())
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let spawn_failure = |source: std::io::Error| CodecovError::StageSpawn {
            command: invocation.command,
            source,
        };

        let (status, stdout) = if invocation.capture_stdout {
            let output = command
                .stdout(Stdio::piped())
                .output()
                .await
                .map_err(spawn_failure)?;
            let text = String::from_utf8_lossy(&output.stdout).to_string();
            for line in text.lines() {
                info!(stage = %invocation.command, "{}", line);
            }
            (output.status, Some(text))
        } else {
            let status = command
                .stdout(Stdio::inherit())
                .status()
                .await
                .map_err(spawn_failure)?;
            (status, None)
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);
        debug!(stage = %invocation.command, exit_code, duration_ms, "Stage exited");

        Ok(StageOutput {
            exit_code,
            stdout,
            duration_ms,
        })
    }
}

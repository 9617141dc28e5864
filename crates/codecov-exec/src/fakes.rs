//! In-memory fakes for the pipeline collaborators (testing only)
//!
//! Provides `StaticProvisioner`, `ScriptedRunner`, and `MemoryExporter` that
//! satisfy the trait contracts without network access or a real uploader.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CodecovError;
use crate::export::VariableExporter;
use crate::provision::{BinaryProvisioner, Platform};
use crate::runner::{StageOutput, StageRunner};
use crate::stage::{StageCommand, StageInvocation};
use crate::Result;

// ---------------------------------------------------------------------------
// StaticProvisioner
// ---------------------------------------------------------------------------

/// Writes a placeholder uploader into a directory, or fails on demand.
#[derive(Debug)]
pub struct StaticProvisioner {
    dir: PathBuf,
    fail: bool,
    requests: Mutex<Vec<(Platform, String)>>,
}

impl StaticProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provisioner whose every call fails like a broken download.
    pub fn failing(dir: impl Into<PathBuf>) -> Self {
        Self {
            fail: true,
            ..Self::new(dir)
        }
    }

    /// `(platform, version)` pairs requested so far.
    pub fn requests(&self) -> Vec<(Platform, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BinaryProvisioner for StaticProvisioner {
    async fn provision(&self, platform: Platform, version: &str) -> Result<PathBuf> {
        self.requests
            .lock()
            .unwrap()
            .push((platform, version.to_string()));
        if self.fail {
            return Err(CodecovError::Http("connection refused".to_string()));
        }
        let path = self.dir.join(platform.uploader_name());
        tokio::fs::write(&path, b"fake uploader").await?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Scripted reply for one invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit { code: i32, stdout: String },
    SpawnError(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Exit {
            code: 0,
            stdout: String::new(),
        }
    }

    pub fn exit(code: i32) -> Self {
        Reply::Exit {
            code,
            stdout: String::new(),
        }
    }

    pub fn stdout(stdout: &str) -> Self {
        Reply::Exit {
            code: 0,
            stdout: stdout.to_string(),
        }
    }
}

/// Invocation as observed by the runner, plus whether the binary existed.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub binary: PathBuf,
    pub binary_present: bool,
    pub invocation: StageInvocation,
}

/// Answers invocations from per-command reply queues and records every call.
///
/// Commands without a queued reply exit 0 with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<StageCommand, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call of `command`.
    pub fn reply(self, command: StageCommand, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(command)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands invoked, in order.
    pub fn commands(&self) -> Vec<StageCommand> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.invocation.command)
            .collect()
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run(&self, binary: &Path, invocation: &StageInvocation) -> Result<StageOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            binary: binary.to_path_buf(),
            binary_present: binary.exists(),
            invocation: invocation.clone(),
        });

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&invocation.command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(Reply::ok);

        match reply {
            Reply::Exit { code, stdout } => Ok(StageOutput {
                exit_code: code,
                stdout: invocation.capture_stdout.then_some(stdout),
                duration_ms: 1,
            }),
            Reply::SpawnError(message) => Err(CodecovError::StageSpawn {
                command: invocation.command,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryExporter
// ---------------------------------------------------------------------------

/// Keeps exported variables in memory, in export order.
#[derive(Debug, Default)]
pub struct MemoryExporter {
    exported: Mutex<Vec<(String, String)>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> Vec<(String, String)> {
        self.exported.lock().unwrap().clone()
    }

    /// Last value exported under `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.exported
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

impl VariableExporter for MemoryExporter {
    fn export(&self, name: &str, value: &str) -> Result<()> {
        self.exported
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}

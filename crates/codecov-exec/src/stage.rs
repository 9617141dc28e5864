//! Uploader stage definitions and invocations.

use crate::context::RunIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Coverage token consumed by `create-commit` and `create-report`.
pub const TOKEN_VAR: &str = "CODECOV_TOKEN";

/// Token consumed by `static-analysis` and `label-analysis`.
pub const STATIC_TOKEN_VAR: &str = "CODECOV_STATIC_TOKEN";

const SECRET_VARS: [&str; 2] = [TOKEN_VAR, STATIC_TOKEN_VAR];

/// Uploader sub-commands, in pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageCommand {
    /// create-commit
    Commit,

    /// create-report
    Report,

    /// static-analysis
    StaticAnalysis,

    /// label-analysis
    LabelAnalysis,
}

impl StageCommand {
    /// Command keyword passed to the uploader.
    pub fn keyword(&self) -> &'static str {
        match self {
            StageCommand::Commit => "create-commit",
            StageCommand::Report => "create-report",
            StageCommand::StaticAnalysis => "static-analysis",
            StageCommand::LabelAnalysis => "label-analysis",
        }
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Variables merged over the inherited environment when a stage is spawned.
///
/// Secrets only ever travel through here; `Debug` masks their values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    /// Overlay carrying the CI run identity. `GITHUB_HEAD_REF` is always present.
    pub fn with_identity(identity: &RunIdentity) -> Self {
        let mut overlay = Self::default();
        let pairs = [
            ("GITHUB_ACTION", &identity.action),
            ("GITHUB_RUN_ID", &identity.run_id),
            ("GITHUB_REF", &identity.git_ref),
            ("GITHUB_REPOSITORY", &identity.repository),
            ("GITHUB_SHA", &identity.sha),
        ];
        for (name, value) in pairs {
            if let Some(value) = value {
                overlay.set(name, value);
            }
        }
        overlay.set(
            "GITHUB_HEAD_REF",
            identity.head_ref.as_deref().unwrap_or_default(),
        );
        overlay
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    /// Set `name` only when a value was provided.
    pub fn set_opt(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl fmt::Debug for EnvOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.vars {
            if SECRET_VARS.contains(&name.as_str()) {
                map.entry(name, &"***");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

/// One fully-resolved uploader call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub command: StageCommand,

    /// Stage-specific arguments following the command keyword.
    pub args: Vec<String>,

    pub env: EnvOverlay,

    pub working_dir: Option<PathBuf>,

    /// Whether standard output should be collected and returned.
    pub capture_stdout: bool,
}

impl StageInvocation {
    pub fn new(command: StageCommand, args: Vec<String>, env: EnvOverlay) -> Self {
        Self {
            command,
            args,
            env,
            working_dir: None,
            capture_stdout: false,
        }
    }

    pub fn in_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn capturing_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Copy of this invocation targeting one label-analysis base commit.
    pub fn with_base_sha(&self, base_sha: &str) -> Self {
        let mut next = self.clone();
        next.args.push("--base-sha".to_string());
        next.args.push(base_sha.to_string());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_keywords() {
        assert_eq!(StageCommand::Commit.keyword(), "create-commit");
        assert_eq!(StageCommand::Report.keyword(), "create-report");
        assert_eq!(StageCommand::StaticAnalysis.keyword(), "static-analysis");
        assert_eq!(StageCommand::LabelAnalysis.keyword(), "label-analysis");
        assert_eq!(StageCommand::Report.to_string(), "create-report");
    }

    #[test]
    fn test_overlay_always_carries_head_ref() {
        let overlay = EnvOverlay::with_identity(&RunIdentity {
            run_id: Some("77".to_string()),
            ..Default::default()
        });

        assert_eq!(overlay.get("GITHUB_RUN_ID"), Some("77"));
        assert_eq!(overlay.get("GITHUB_HEAD_REF"), Some(""));
        assert_eq!(overlay.get("GITHUB_SHA"), None);
        assert_eq!(overlay.len(), 2);
    }

    #[test]
    fn test_overlay_debug_masks_secrets() {
        let mut overlay = EnvOverlay::default();
        overlay.set(TOKEN_VAR, "s3cr3t");
        overlay.set("GITHUB_SHA", "abc");

        let rendered = format!("{:?}", overlay);
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("abc"));
    }

    #[test]
    fn test_with_base_sha_returns_new_invocation() {
        let base = StageInvocation::new(
            StageCommand::LabelAnalysis,
            vec!["--dry-run".to_string()],
            EnvOverlay::default(),
        );
        let targeted = base.with_base_sha("p1");

        assert_eq!(base.args, vec!["--dry-run"]);
        assert_eq!(targeted.args, vec!["--dry-run", "--base-sha", "p1"]);
    }
}

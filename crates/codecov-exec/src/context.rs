//! Ambient CI context: event kind, pull-request data and run identity.
//!
//! Everything here is read once, up front, so the argument builders can stay
//! pure functions of `(UploaderConfig, CiContext)`.

use crate::Result;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Kind of event that triggered the CI run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventKind {
    PullRequest,
    PullRequestTarget,
    #[default]
    Other,
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "pull_request" => EventKind::PullRequest,
            "pull_request_target" => EventKind::PullRequestTarget,
            _ => EventKind::Other,
        }
    }

    /// Whether the event carries a pull request payload.
    pub fn is_pull_request(&self) -> bool {
        matches!(self, EventKind::PullRequest | EventKind::PullRequestTarget)
    }
}

/// Run identity copied into every stage's environment overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunIdentity {
    pub action: Option<String>,
    pub run_id: Option<String>,
    pub git_ref: Option<String>,
    pub repository: Option<String>,
    pub sha: Option<String>,
    pub head_ref: Option<String>,
}

/// Snapshot of the CI environment the pipeline runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiContext {
    pub event: EventKind,
    pub pr_head_sha: Option<String>,
    pub pr_base_sha: Option<String>,
    pub pr_number: Option<String>,
    pub identity: RunIdentity,

    /// First parent of HEAD, resolved from the local checkout.
    pub parent_commit: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EventPayload {
    number: Option<u64>,
    pull_request: Option<PullRequestPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    head: CommitRef,
    base: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

impl CiContext {
    /// Read the context from `GITHUB_*` variables and the event payload file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the context through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event = lookup("GITHUB_EVENT_NAME")
            .map(|name| EventKind::parse(&name))
            .unwrap_or_default();

        let payload = match lookup("GITHUB_EVENT_PATH").filter(|p| !p.is_empty()) {
            Some(path) => read_payload(Path::new(&path))?,
            None => EventPayload::default(),
        };

        let identity = RunIdentity {
            action: lookup("GITHUB_ACTION"),
            run_id: lookup("GITHUB_RUN_ID"),
            git_ref: lookup("GITHUB_REF"),
            repository: lookup("GITHUB_REPOSITORY"),
            sha: lookup("GITHUB_SHA"),
            head_ref: lookup("GITHUB_HEAD_REF"),
        };

        let (pr_head_sha, pr_base_sha) = match payload.pull_request {
            Some(pr) => (Some(pr.head.sha), Some(pr.base.sha)),
            None => (None, None),
        };

        Ok(Self {
            event,
            pr_head_sha,
            pr_base_sha,
            pr_number: payload.number.map(|n| n.to_string()),
            identity,
            parent_commit: None,
        })
    }

    /// Resolve `parent_commit` with `git rev-parse HEAD^`, run in `dir` when
    /// given (the uploader's working directory).
    ///
    /// A failed lookup leaves it unset; label analysis then skips that candidate.
    pub async fn with_parent_commit_from_git(mut self, dir: Option<&Path>) -> Self {
        let mut git = Command::new("git");
        git.args(["rev-parse", "HEAD^"]);
        if let Some(dir) = dir {
            git.current_dir(dir);
        }
        let output = git.output().await;

        match output {
            Ok(out) if out.status.success() => {
                let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
                debug!(parent = %sha, "Resolved parent commit");
                self.parent_commit = Some(sha).filter(|s| !s.is_empty());
            }
            Ok(out) => {
                warn!(
                    "Could not resolve parent commit: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => warn!("Could not run git to resolve parent commit: {}", e),
        }
        self
    }

    /// PR base commit, only meaningful on pull request events.
    pub fn pr_base_commit(&self) -> Option<&str> {
        if self.event.is_pull_request() {
            self.pr_base_sha.as_deref()
        } else {
            None
        }
    }
}

fn read_payload(path: &Path) -> Result<EventPayload> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("pull_request"), EventKind::PullRequest);
        assert_eq!(
            EventKind::parse("pull_request_target"),
            EventKind::PullRequestTarget
        );
        assert_eq!(EventKind::parse("push"), EventKind::Other);
        assert!(!EventKind::Other.is_pull_request());
    }

    #[test]
    fn test_from_lookup_reads_pull_request_payload() {
        let dir = tempfile::tempdir().unwrap();
        let event_path = dir.path().join("event.json");
        std::fs::write(
            &event_path,
            r#"{"number": 42, "pull_request": {"head": {"sha": "head1"}, "base": {"sha": "base1"}}}"#,
        )
        .unwrap();

        let vars = HashMap::from([
            ("GITHUB_EVENT_NAME", "pull_request_target".to_string()),
            ("GITHUB_EVENT_PATH", event_path.display().to_string()),
            ("GITHUB_SHA", "merge1".to_string()),
            ("GITHUB_REPOSITORY", "acme/widgets".to_string()),
        ]);
        let ci = CiContext::from_lookup(lookup_from(vars)).unwrap();

        assert_eq!(ci.event, EventKind::PullRequestTarget);
        assert_eq!(ci.pr_head_sha.as_deref(), Some("head1"));
        assert_eq!(ci.pr_base_commit(), Some("base1"));
        assert_eq!(ci.pr_number.as_deref(), Some("42"));
        assert_eq!(ci.identity.sha.as_deref(), Some("merge1"));
        assert_eq!(ci.identity.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(ci.parent_commit, None);
    }

    #[test]
    fn test_from_lookup_without_payload() {
        let vars = HashMap::from([("GITHUB_EVENT_NAME", "push".to_string())]);
        let ci = CiContext::from_lookup(lookup_from(vars)).unwrap();

        assert_eq!(ci.event, EventKind::Other);
        assert_eq!(ci.pr_head_sha, None);
        assert_eq!(ci.pr_number, None);
    }

    #[test]
    fn test_from_lookup_rejects_malformed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let event_path = dir.path().join("event.json");
        std::fs::write(&event_path, "not json").unwrap();

        let vars = HashMap::from([("GITHUB_EVENT_PATH", event_path.display().to_string())]);
        let err = CiContext::from_lookup(lookup_from(vars)).unwrap_err();
        assert!(err.to_string().contains("Invalid event payload"));
    }

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .args(["-c", "user.name=ci", "-c", "user.email=ci@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_parent_commit_lookup_runs_in_given_dir() {
        let dir = tempfile::tempdir().unwrap();
        if !git(dir.path(), &["init", "-q"]) {
            // git unavailable
            return;
        }
        assert!(git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "one"]));
        assert!(git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "two"]));
        let out = std::process::Command::new("git")
            .args(["rev-parse", "HEAD~1"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let parent = String::from_utf8_lossy(&out.stdout).trim().to_string();

        let ci = CiContext::default()
            .with_parent_commit_from_git(Some(dir.path()))
            .await;
        assert_eq!(ci.parent_commit.as_deref(), Some(parent.as_str()));

        let missing = dir.path().join("missing");
        let ci = CiContext::default()
            .with_parent_commit_from_git(Some(&missing))
            .await;
        assert_eq!(ci.parent_commit, None);
    }

    #[test]
    fn test_pr_base_commit_ignored_outside_pull_requests() {
        let ci = CiContext {
            event: EventKind::Other,
            pr_base_sha: Some("base1".to_string()),
            ..Default::default()
        };
        assert_eq!(ci.pr_base_commit(), None);
    }
}

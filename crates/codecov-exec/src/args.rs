//! Per-stage argument construction.
//!
//! Every builder is a pure function of the action inputs and the CI context:
//! unset inputs produce no flag at all, and secrets are routed into the
//! environment overlay instead of the argument list.

use crate::config::UploaderConfig;
use crate::context::{CiContext, EventKind};
use crate::stage::{EnvOverlay, StageCommand, StageInvocation, STATIC_TOKEN_VAR, TOKEN_VAR};
use std::path::{Path, PathBuf};

/// Where label-analysis output is written when `test_output_path` is unset.
pub const DEFAULT_TEST_OUTPUT_PATH: &str = "tmp-codecov-labels";

/// Label-analysis invocation plus the base commits to try, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAnalysisPlan {
    pub invocation: StageInvocation,

    /// Candidate base commits; empty entries are skipped by the pipeline.
    pub base_commits: Vec<String>,

    pub test_output_path: PathBuf,
}

/// Commit under test: explicit override, else the PR head on pull request events.
fn resolve_commit<'a>(config: &'a UploaderConfig, ci: &'a CiContext) -> Option<&'a str> {
    config.override_commit.as_deref().or_else(|| {
        if ci.event.is_pull_request() {
            ci.pr_head_sha.as_deref()
        } else {
            None
        }
    })
}

/// PR number: explicit override, else the payload number on `pull_request_target`.
fn resolve_pr<'a>(config: &'a UploaderConfig, ci: &'a CiContext) -> Option<&'a str> {
    config.override_pr.as_deref().or_else(|| {
        if ci.event == EventKind::PullRequestTarget {
            ci.pr_number.as_deref()
        } else {
            None
        }
    })
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// `create-commit`
pub fn build_commit(config: &UploaderConfig, ci: &CiContext) -> StageInvocation {
    let mut args = Vec::new();
    push_opt(&mut args, "--parent-sha", config.commit_parent.as_deref());
    push_opt(&mut args, "-B", config.override_branch.as_deref());
    push_opt(&mut args, "-C", resolve_commit(config, ci));
    push_opt(&mut args, "--pr", resolve_pr(config, ci));
    push_opt(&mut args, "--slug", config.slug.as_deref());

    let mut env = EnvOverlay::with_identity(&ci.identity);
    env.set_opt(TOKEN_VAR, config.token.as_deref());

    StageInvocation::new(StageCommand::Commit, args, env)
        .in_dir(config.working_directory.clone())
}

/// `create-report`
pub fn build_report(config: &UploaderConfig, ci: &CiContext) -> StageInvocation {
    let mut args = Vec::new();
    push_opt(&mut args, "-C", resolve_commit(config, ci));
    push_opt(&mut args, "--slug", config.slug.as_deref());

    let mut env = EnvOverlay::with_identity(&ci.identity);
    env.set_opt(TOKEN_VAR, config.token.as_deref());

    StageInvocation::new(StageCommand::Report, args, env)
        .in_dir(config.working_directory.clone())
}

/// `static-analysis`
pub fn build_static_analysis(config: &UploaderConfig, ci: &CiContext) -> StageInvocation {
    let mut args = Vec::new();
    push_opt(&mut args, "--pattern", config.file_pattern.as_deref());
    push_opt(
        &mut args,
        "--folders-to-exclude",
        config.folders_to_exclude.as_deref(),
    );
    if config.force() {
        args.push("--force".to_string());
    }
    push_opt(&mut args, "--commit-sha", resolve_commit(config, ci));

    let mut env = EnvOverlay::with_identity(&ci.identity);
    env.set_opt(STATIC_TOKEN_VAR, config.static_token.as_deref());

    StageInvocation::new(StageCommand::StaticAnalysis, args, env)
        .in_dir(config.working_directory.clone())
}

/// `label-analysis`, always as a dry run.
pub fn build_label_analysis(config: &UploaderConfig, ci: &CiContext) -> LabelAnalysisPlan {
    let mut args = vec!["--dry-run".to_string()];
    push_opt(&mut args, "--head-sha", resolve_commit(config, ci));
    push_opt(&mut args, "--max-wait-time", config.max_wait_time.as_deref());

    let mut env = EnvOverlay::with_identity(&ci.identity);
    env.set_opt(STATIC_TOKEN_VAR, config.static_token.as_deref());

    let base_commits = match &config.override_base_commit {
        Some(base) => vec![base.clone()],
        None => vec![
            ci.parent_commit.clone().unwrap_or_default(),
            ci.pr_base_commit().unwrap_or_default().to_string(),
        ],
    };

    // Relative output paths live next to the uploader's working directory.
    let output = Path::new(
        config
            .test_output_path
            .as_deref()
            .unwrap_or(DEFAULT_TEST_OUTPUT_PATH),
    );
    let test_output_path = match &config.working_directory {
        Some(dir) if output.is_relative() => dir.join(output),
        _ => output.to_path_buf(),
    };

    LabelAnalysisPlan {
        invocation: StageInvocation::new(StageCommand::LabelAnalysis, args, env)
            .in_dir(config.working_directory.clone())
            .capturing_stdout(),
        base_commits,
        test_output_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunIdentity;

    fn pr_context(event: EventKind) -> CiContext {
        CiContext {
            event,
            pr_head_sha: Some("head1".to_string()),
            pr_base_sha: Some("base1".to_string()),
            pr_number: Some("42".to_string()),
            identity: RunIdentity {
                run_id: Some("9".to_string()),
                sha: Some("merge1".to_string()),
                ..Default::default()
            },
            parent_commit: Some("parent1".to_string()),
        }
    }

    fn config() -> UploaderConfig {
        UploaderConfig::default()
    }

    #[test]
    fn test_pull_request_head_used_by_every_stage() {
        let ci = pr_context(EventKind::PullRequest);
        let c = config();

        assert_eq!(build_commit(&c, &ci).args, vec!["-C", "head1"]);
        assert_eq!(build_report(&c, &ci).args, vec!["-C", "head1"]);
        assert_eq!(
            build_static_analysis(&c, &ci).args,
            vec!["--commit-sha", "head1"]
        );
        assert_eq!(
            build_label_analysis(&c, &ci).invocation.args,
            vec!["--dry-run", "--head-sha", "head1"]
        );
    }

    #[test]
    fn test_overrides_win_over_event_values() {
        for event in [
            EventKind::PullRequest,
            EventKind::PullRequestTarget,
            EventKind::Other,
        ] {
            let ci = pr_context(event);
            let c = UploaderConfig {
                override_commit: Some("ovr".to_string()),
                override_branch: Some("feature".to_string()),
                override_pr: Some("7".to_string()),
                ..config()
            };

            assert_eq!(
                build_commit(&c, &ci).args,
                vec!["-B", "feature", "-C", "ovr", "--pr", "7"]
            );
            assert_eq!(build_report(&c, &ci).args, vec!["-C", "ovr"]);
            assert_eq!(
                build_static_analysis(&c, &ci).args,
                vec!["--commit-sha", "ovr"]
            );
            assert_eq!(
                build_label_analysis(&c, &ci).invocation.args,
                vec!["--dry-run", "--head-sha", "ovr"]
            );
        }
    }

    #[test]
    fn test_commit_override_on_push() {
        let ci = CiContext::default();
        let c = UploaderConfig {
            override_commit: Some("abc123".to_string()),
            ..config()
        };

        let args = build_commit(&c, &ci).args;
        assert_eq!(args, vec!["-C", "abc123"]);
        assert!(!args.contains(&"--pr".to_string()));
    }

    #[test]
    fn test_pr_number_only_on_pull_request_target() {
        let target = pr_context(EventKind::PullRequestTarget);
        assert_eq!(
            build_commit(&config(), &target).args,
            vec!["-C", "head1", "--pr", "42"]
        );
        assert_eq!(build_report(&config(), &target).args, vec!["-C", "head1"]);

        let plain = pr_context(EventKind::PullRequest);
        assert!(!build_commit(&config(), &plain)
            .args
            .contains(&"--pr".to_string()));
    }

    #[test]
    fn test_push_without_overrides_has_no_commit_flags() {
        let ci = pr_context(EventKind::Other);
        assert!(build_commit(&config(), &ci).args.is_empty());
        assert!(build_report(&config(), &ci).args.is_empty());
        assert!(build_static_analysis(&config(), &ci).args.is_empty());
        assert_eq!(
            build_label_analysis(&config(), &ci).invocation.args,
            vec!["--dry-run"]
        );
    }

    #[test]
    fn test_commit_optional_flags() {
        let c = UploaderConfig {
            commit_parent: Some("p0".to_string()),
            slug: Some("acme/widgets".to_string()),
            ..config()
        };
        assert_eq!(
            build_commit(&c, &CiContext::default()).args,
            vec!["--parent-sha", "p0", "--slug", "acme/widgets"]
        );
    }

    #[test]
    fn test_static_analysis_flags() {
        let c = UploaderConfig {
            file_pattern: Some("*.py".to_string()),
            folders_to_exclude: Some("vendor".to_string()),
            force: Some("true".to_string()),
            ..config()
        };
        assert_eq!(
            build_static_analysis(&c, &CiContext::default()).args,
            vec!["--pattern", "*.py", "--folders-to-exclude", "vendor", "--force"]
        );

        let not_forced = UploaderConfig {
            force: Some("false".to_string()),
            ..config()
        };
        assert!(build_static_analysis(&not_forced, &CiContext::default())
            .args
            .is_empty());
    }

    #[test]
    fn test_tokens_only_in_environment() {
        let ci = pr_context(EventKind::PullRequest);
        let c = UploaderConfig {
            token: Some("tok".to_string()),
            static_token: Some("stok".to_string()),
            ..config()
        };

        let commit = build_commit(&c, &ci);
        let report = build_report(&c, &ci);
        let static_analysis = build_static_analysis(&c, &ci);
        let labels = build_label_analysis(&c, &ci).invocation;

        assert_eq!(commit.env.get(TOKEN_VAR), Some("tok"));
        assert_eq!(report.env.get(TOKEN_VAR), Some("tok"));
        assert_eq!(static_analysis.env.get(STATIC_TOKEN_VAR), Some("stok"));
        assert_eq!(static_analysis.env.get(TOKEN_VAR), None);
        assert_eq!(labels.env.get(STATIC_TOKEN_VAR), Some("stok"));

        for invocation in [&commit, &report, &static_analysis, &labels] {
            assert!(invocation
                .args
                .iter()
                .all(|arg| !arg.contains("tok")));
            assert_eq!(invocation.env.get("GITHUB_RUN_ID"), Some("9"));
            assert_eq!(invocation.env.get("GITHUB_SHA"), Some("merge1"));
        }
    }

    #[test]
    fn test_no_token_no_variable() {
        let invocation = build_commit(&config(), &CiContext::default());
        assert_eq!(invocation.env.get(TOKEN_VAR), None);
    }

    #[test]
    fn test_label_analysis_candidates() {
        let ci = pr_context(EventKind::PullRequest);
        let c = UploaderConfig {
            max_wait_time: Some("120".to_string()),
            ..config()
        };
        let plan = build_label_analysis(&c, &ci);

        assert_eq!(plan.base_commits, vec!["parent1", "base1"]);
        assert!(plan.invocation.capture_stdout);
        assert_eq!(
            plan.invocation.args,
            vec!["--dry-run", "--head-sha", "head1", "--max-wait-time", "120"]
        );
        assert_eq!(plan.test_output_path, PathBuf::from(DEFAULT_TEST_OUTPUT_PATH));
    }

    #[test]
    fn test_label_analysis_base_override_short_circuits() {
        let ci = pr_context(EventKind::PullRequest);
        let c = UploaderConfig {
            override_base_commit: Some("base-ovr".to_string()),
            test_output_path: Some("labels.txt".to_string()),
            ..config()
        };
        let plan = build_label_analysis(&c, &ci);

        assert_eq!(plan.base_commits, vec!["base-ovr"]);
        assert_eq!(plan.test_output_path, PathBuf::from("labels.txt"));
    }

    #[test]
    fn test_label_analysis_missing_candidates_are_empty() {
        let plan = build_label_analysis(&config(), &CiContext::default());
        assert_eq!(plan.base_commits, vec!["", ""]);
    }

    #[test]
    fn test_working_directory_propagates() {
        let c = UploaderConfig {
            working_directory: Some(PathBuf::from("sub/project")),
            ..config()
        };
        let ci = CiContext::default();

        for invocation in [
            build_commit(&c, &ci),
            build_report(&c, &ci),
            build_static_analysis(&c, &ci),
            build_label_analysis(&c, &ci).invocation,
        ] {
            assert_eq!(invocation.working_dir, Some(PathBuf::from("sub/project")));
        }
    }

    #[test]
    fn test_output_path_follows_working_directory() {
        let ci = CiContext::default();
        let relative = UploaderConfig {
            working_directory: Some(PathBuf::from("sub/project")),
            ..config()
        };
        assert_eq!(
            build_label_analysis(&relative, &ci).test_output_path,
            PathBuf::from("sub/project").join(DEFAULT_TEST_OUTPUT_PATH)
        );

        let absolute = UploaderConfig {
            test_output_path: Some("/tmp/labels.txt".to_string()),
            ..relative
        };
        assert_eq!(
            build_label_analysis(&absolute, &ci).test_output_path,
            PathBuf::from("/tmp/labels.txt")
        );
    }

    #[test]
    fn test_malformed_values_pass_through() {
        let c = UploaderConfig {
            max_wait_time: Some("soon".to_string()),
            ..config()
        };
        let plan = build_label_analysis(&c, &CiContext::default());
        assert_eq!(plan.invocation.args, vec!["--dry-run", "--max-wait-time", "soon"]);
    }
}

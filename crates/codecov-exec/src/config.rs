//! Action inputs and the global uploader flags derived from them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Version requested when the `version` input is left unset.
pub const LATEST_VERSION: &str = "latest";

/// Interpret an action input as a boolean.
///
/// Accepts `1`, `t`, `true`, `y`, `yes` in any case; everything else is false.
pub fn is_true(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes"
    )
}

/// Inputs controlling every uploader stage.
///
/// String fields hold `None` when the input was not supplied. Construct through
/// [`UploaderConfig::normalized`] when the values come from a CI runner, which
/// reports unset inputs as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    pub commit_parent: Option<String>,
    pub override_branch: Option<String>,
    pub override_commit: Option<String>,
    pub override_pr: Option<String>,
    pub slug: Option<String>,
    pub token: Option<String>,
    pub fail_ci_if_error: Option<String>,
    pub os: Option<String>,
    pub url: Option<String>,
    pub verbose: Option<String>,
    pub version: Option<String>,
    pub file_pattern: Option<String>,
    pub folders_to_exclude: Option<String>,
    pub force: Option<String>,
    pub static_token: Option<String>,
    pub override_base_commit: Option<String>,
    pub max_wait_time: Option<String>,
    pub test_output_path: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub skip_validation: Option<String>,
}

impl UploaderConfig {
    /// Drop empty-string values so they behave exactly like unset inputs.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.commit_parent,
            &mut self.override_branch,
            &mut self.override_commit,
            &mut self.override_pr,
            &mut self.slug,
            &mut self.token,
            &mut self.fail_ci_if_error,
            &mut self.os,
            &mut self.url,
            &mut self.verbose,
            &mut self.version,
            &mut self.file_pattern,
            &mut self.folders_to_exclude,
            &mut self.force,
            &mut self.static_token,
            &mut self.override_base_commit,
            &mut self.max_wait_time,
            &mut self.test_output_path,
            &mut self.skip_validation,
        ] {
            if field.as_deref().is_some_and(str::is_empty) {
                *field = None;
            }
        }
        if self
            .working_directory
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.working_directory = None;
        }
        self
    }

    pub fn fail_ci(&self) -> bool {
        flag(&self.fail_ci_if_error)
    }

    pub fn is_verbose(&self) -> bool {
        flag(&self.verbose)
    }

    pub fn force(&self) -> bool {
        flag(&self.force)
    }

    pub fn skip_validation(&self) -> bool {
        flag(&self.skip_validation)
    }

    /// Uploader version to fetch, `latest` when unset.
    pub fn uploader_version(&self) -> String {
        self.version
            .clone()
            .unwrap_or_else(|| LATEST_VERSION.to_string())
    }
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref().map(is_true).unwrap_or(false)
}

/// Flags shared by every stage, placed between the binary and the command keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralArgs {
    /// Global arguments (`--enterprise-url`, `-v`).
    pub args: Vec<String>,

    /// Whether hard failures should fail the CI job.
    pub fail_ci: bool,

    /// Explicit platform requested through the `os` input.
    pub os: Option<String>,

    pub verbose: bool,

    /// Uploader version to download.
    pub uploader_version: String,
}

impl GeneralArgs {
    pub fn from_config(config: &UploaderConfig) -> Self {
        let mut args = Vec::new();
        if let Some(url) = &config.url {
            args.push("--enterprise-url".to_string());
            args.push(url.clone());
        }
        let verbose = config.is_verbose();
        if verbose {
            args.push("-v".to_string());
        }

        Self {
            args,
            fail_ci: config.fail_ci(),
            os: config.os.clone(),
            verbose,
            uploader_version: config.uploader_version(),
        }
    }
}

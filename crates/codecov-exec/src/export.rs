//! Exporting variables to later steps of the CI job.

use crate::Result;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Variable carrying the label-analysis test selection.
pub const TESTS_TO_RUN_VAR: &str = "CODECOV_ATS_TESTS_TO_RUN";

/// Receives variables the pipeline makes visible to subsequent CI steps.
pub trait VariableExporter: Send + Sync {
    fn export(&self, name: &str, value: &str) -> Result<()>;
}

/// Appends to the file named by `$GITHUB_ENV`.
///
/// Values use the heredoc form (`NAME<<DELIM`) so they may contain newlines.
#[derive(Debug, Clone, Default)]
pub struct GithubEnvExporter {
    env_file: Option<PathBuf>,
}

impl GithubEnvExporter {
    pub fn new(env_file: Option<PathBuf>) -> Self {
        Self { env_file }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os("GITHUB_ENV")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        )
    }
}

impl VariableExporter for GithubEnvExporter {
    fn export(&self, name: &str, value: &str) -> Result<()> {
        info!(name, value, "Exporting variable");
        let Some(path) = &self.env_file else {
            return Ok(());
        };

        let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{name}<<{delimiter}")?;
        writeln!(file, "{value}")?;
        writeln!(file, "{delimiter}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_env_heredoc_format() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("github_env");
        let exporter = GithubEnvExporter::new(Some(env_file.clone()));

        exporter.export(TESTS_TO_RUN_VAR, "test_a test_b").unwrap();
        exporter.export(TESTS_TO_RUN_VAR, "").unwrap();

        let content = std::fs::read_to_string(&env_file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);

        let delimiter = lines[0]
            .strip_prefix("CODECOV_ATS_TESTS_TO_RUN<<")
            .expect("heredoc header");
        assert!(delimiter.starts_with("ghadelimiter_"));
        assert_eq!(lines[1], "test_a test_b");
        assert_eq!(lines[2], delimiter);
        assert_eq!(lines[4], "");
    }

    #[test]
    fn test_github_env_without_file_is_noop() {
        GithubEnvExporter::new(None)
            .export(TESTS_TO_RUN_VAR, "x")
            .unwrap();
    }
}

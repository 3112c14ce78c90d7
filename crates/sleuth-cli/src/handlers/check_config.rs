//! Check-config command handler

use crate::error::{CliError, CliResult};
use crate::output::Reporter;
use crate::CheckConfigArgs;
use sleuth::{RunConfig, SleuthError};

/// Execute the check-config command
pub fn execute_check_config(reporter: &Reporter, args: &CheckConfigArgs) -> CliResult<()> {
    let config = RunConfig::load(&args.config)?;

    if args.show {
        reporter.emit(&render(&config)?);
    }

    let checked = if args.mail_only {
        config.validate_mail()
    } else {
        config.validate()
    };

    match checked {
        Ok(()) => {
            reporter.success(&format!("{} is valid", args.config.display()));
            Ok(())
        }
        Err(SleuthError::Config { message }) => {
            let problems = problems(&message);
            for problem in &problems {
                reporter.failure(problem);
            }
            Err(CliError::config(format!(
                "{} problem(s) in {}",
                problems.len(),
                args.config.display()
            )))
        }
        Err(other) => Err(other.into()),
    }
}

/// Effective configuration as YAML. The password is never serialized.
pub fn render(config: &RunConfig) -> CliResult<String> {
    Ok(config.to_yaml()?)
}

/// Split a validation message into its problems
#[must_use]
pub fn problems(message: &str) -> Vec<&str> {
    message
        .split("; ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sleuth::Locator;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args(path: PathBuf) -> CheckConfigArgs {
        CheckConfigArgs {
            config: path,
            mail_only: false,
            show: false,
        }
    }

    #[test]
    fn test_problems_split() {
        assert_eq!(
            problems("app.login_url is required; mail.sender is required"),
            vec!["app.login_url is required", "mail.sender is required"]
        );
    }

    #[test]
    fn test_problems_single() {
        assert_eq!(problems("mail.host is required"), vec!["mail.host is required"]);
    }

    #[test]
    fn test_render_omits_password() {
        let mut config = RunConfig::new();
        config.mail.password = "hunter2".into();
        config.mail.sender = "no-reply@example.com".into();
        let yaml = render(&config).unwrap();
        assert!(yaml.contains("no-reply@example.com"));
        assert!(!yaml.contains("hunter2"));
    }

    #[test]
    fn test_show_output_loads_back() {
        let dir = TempDir::new().unwrap();
        let mut config = RunConfig::new();
        config.locators.signed_in = Locator::css("#factors");
        let yaml = render(&config).unwrap();
        assert!(!yaml.contains("!css"));
        let path = dir.path().join("shown.yaml");
        std::fs::write(&path, yaml).unwrap();
        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.locators.signed_in, Locator::css("#factors"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = execute_check_config(
            &Reporter::new(false, true),
            &args(dir.path().join("absent.yaml")),
        );
        assert!(matches!(result, Err(CliError::Sleuth(SleuthError::Config { .. }))));
    }

    #[test]
    fn test_incomplete_file_reports_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sleuth.yaml");
        std::fs::write(&path, "app:\n  factors: []\n").unwrap();
        let err = execute_check_config(&Reporter::new(false, true), &args(path)).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
        assert!(err.to_string().contains("problem(s)"));
    }
}

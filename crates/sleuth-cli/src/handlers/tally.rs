//! Tally command handler

use crate::error::CliResult;
use crate::output::{OutputFormat, Reporter};
use crate::TallyArgs;
use sleuth::config::ReconcileConfig;
use sleuth::{artifact, ArtifactTallyRule, RunConfig, Tally};

/// Execute the tally command
pub fn execute_tally(reporter: &Reporter, args: &TallyArgs) -> CliResult<()> {
    let rule = rule_for(args)?;
    let content = artifact::read(&args.file)?;
    let tally = rule.extract(&content)?;

    match OutputFormat::from(args.format) {
        OutputFormat::Json => reporter.emit(&serde_json::to_string_pretty(&tally)?),
        OutputFormat::Text => {
            for line in tally_lines(&tally) {
                reporter.emit(&line);
            }
        }
    }
    if tally.is_empty() {
        reporter.warning(&format!("no results found in {}", args.file.display()));
    }
    Ok(())
}

/// Rule from the config file, the flags, or the default result table
pub fn rule_for(args: &TallyArgs) -> CliResult<ArtifactTallyRule> {
    if let Some(path) = &args.config {
        return Ok(RunConfig::load(path)?.reconcile.artifact);
    }
    if let Some(selector) = &args.selector {
        return Ok(ArtifactTallyRule::Table {
            selector: selector.clone(),
            column: args.column,
        });
    }
    if let Some(prefix) = &args.prefix {
        return Ok(ArtifactTallyRule::LinePrefix {
            prefix: prefix.clone(),
            key_index: args.key_index,
        });
    }
    Ok(ReconcileConfig::default().artifact)
}

/// `key<TAB>count` per key, then the total
#[must_use]
pub fn tally_lines(tally: &Tally) -> Vec<String> {
    let mut lines: Vec<String> = tally
        .iter()
        .map(|(key, count)| format!("{key}\t{count}"))
        .collect();
    lines.push(format!("total\t{}", tally.total()));
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::FormatArg;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args(file: PathBuf) -> TallyArgs {
        TallyArgs {
            file,
            config: None,
            selector: None,
            column: 1,
            prefix: None,
            key_index: 1,
            format: FormatArg::Text,
        }
    }

    mod rule_tests {
        use super::*;

        #[test]
        fn test_default_is_result_table() {
            let rule = rule_for(&args(PathBuf::from("r.html"))).unwrap();
            assert_eq!(
                rule,
                ArtifactTallyRule::Table {
                    selector: "table.custom-table".into(),
                    column: 1,
                }
            );
        }

        #[test]
        fn test_prefix_flag() {
            let mut args = args(PathBuf::from("r.txt"));
            args.prefix = Some("Issue".into());
            args.key_index = 2;
            assert_eq!(
                rule_for(&args).unwrap(),
                ArtifactTallyRule::LinePrefix {
                    prefix: "Issue".into(),
                    key_index: 2,
                }
            );
        }

        #[test]
        fn test_rule_from_config_file() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("sleuth.yaml");
            std::fs::write(
                &path,
                "reconcile:\n  artifact:\n    line_prefix:\n      prefix: Finding\n",
            )
            .unwrap();
            let mut args = args(PathBuf::from("r.txt"));
            args.config = Some(path);
            assert_eq!(
                rule_for(&args).unwrap(),
                ArtifactTallyRule::LinePrefix {
                    prefix: "Finding".into(),
                    key_index: 1,
                }
            );
        }
    }

    mod output_tests {
        use super::*;

        #[test]
        fn test_lines_sorted_with_total() {
            let tally = Tally::from_keys(["Low", "High", "Low"]);
            assert_eq!(tally_lines(&tally), vec!["High\t1", "Low\t2", "total\t3"]);
        }

        #[test]
        fn test_table_artifact() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("report.html");
            std::fs::write(
                &path,
                "<table class='custom-table'><tbody>\
                 <tr><td>a.py</td><td>High</td></tr>\
                 <tr><td>b.py</td><td>High</td></tr>\
                 </tbody></table>",
            )
            .unwrap();
            execute_tally(&Reporter::new(false, true), &args(path)).unwrap();
        }

        #[test]
        fn test_missing_table_is_error() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("report.html");
            std::fs::write(&path, "<p>nothing</p>").unwrap();
            assert!(execute_tally(&Reporter::new(false, true), &args(path)).is_err());
        }
    }
}

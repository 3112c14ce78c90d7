//! Compare command handler

use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, Reporter};
use crate::CompareArgs;
use serde::Serialize;
use sleuth::{artifact, compare_content, ContentComparison};
use std::path::Path;

#[derive(Debug, Serialize)]
struct CompareOutput<'a> {
    first: &'a Path,
    second: &'a Path,
    #[serde(flatten)]
    comparison: &'a ContentComparison,
}

/// Execute the compare command. Differing artifacts are an error.
pub fn execute_compare(reporter: &Reporter, args: &CompareArgs) -> CliResult<()> {
    let comparison = compare_files(&args.first, &args.second)?;

    match OutputFormat::from(args.format) {
        OutputFormat::Json => {
            let output = CompareOutput {
                first: &args.first,
                second: &args.second,
                comparison: &comparison,
            };
            reporter.emit(&serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for line in describe(&comparison) {
                reporter.emit(&line);
            }
        }
    }

    if comparison.equal {
        reporter.success("artifacts match");
        Ok(())
    } else {
        Err(CliError::mismatch(format!(
            "{} and {} differ",
            args.first.display(),
            args.second.display()
        )))
    }
}

/// Read and compare two artifacts
pub fn compare_files(first: &Path, second: &Path) -> CliResult<ContentComparison> {
    let a = artifact::read(first)?;
    let b = artifact::read(second)?;
    Ok(compare_content(&a, &b))
}

/// Text lines for a comparison
#[must_use]
pub fn describe(comparison: &ContentComparison) -> Vec<String> {
    vec![
        format!("equal:  {}", comparison.equal),
        format!(
            "first:  sha256 {} ({} chars)",
            comparison.first_digest, comparison.first_len
        ),
        format!(
            "second: sha256 {} ({} chars)",
            comparison.second_digest, comparison.second_len
        ),
    ]
}

//! Reconcile command handler

use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, Reporter};
use crate::ReconcileArgs;
use sleuth::{reconcile, Mismatch, SleuthError, Tally};
use std::path::Path;

/// Execute the reconcile command. Any mismatch is an error.
pub fn execute_reconcile(reporter: &Reporter, args: &ReconcileArgs) -> CliResult<()> {
    let observed = load_tally(&args.observed)?;
    let reference = load_tally(&args.reference)?;
    let mismatches = reconcile(&observed, &reference);

    match OutputFormat::from(args.format) {
        OutputFormat::Json => reporter.emit(&serde_json::to_string_pretty(&mismatches)?),
        OutputFormat::Text => {
            for mismatch in &mismatches {
                reporter.emit(&mismatch.to_string());
            }
        }
    }

    verdict(&observed, &mismatches).map(|summary| reporter.success(&summary))
}

/// Read a JSON object of key to count
pub fn load_tally(path: &Path) -> CliResult<Tally> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::invalid_argument(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| CliError::from(SleuthError::config(format!("{}: {e}", path.display()))))
}

/// Summary for agreeing tallies, or the mismatch error
pub fn verdict(observed: &Tally, mismatches: &[Mismatch]) -> CliResult<String> {
    if mismatches.is_empty() {
        return Ok(format!(
            "tallies agree ({} results across {} keys)",
            observed.total(),
            observed.keys().count()
        ));
    }
    Err(CliError::mismatch(
        mismatches
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    ))
}

//! Reconciliation of tallies and artifact contents.
//!
//! A [`Tally`] counts category keys (e.g. issue severities). The same tally is
//! computed from two sources, the live UI and a downloaded artifact, and
//! [`reconcile`] lists every key where they disagree. Disagreement is data,
//! not an error.

use crate::driver::{Locator, UiDriver};
use crate::result::{SleuthError, SleuthResult};
use crate::text::{looks_like_markup, markup_text};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Category key to count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    /// Empty tally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count each key once per occurrence
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tally = Self::new();
        for key in keys {
            tally.add(key, 1);
        }
        tally
    }

    /// Add `n` to a key
    pub fn add(&mut self, key: impl Into<String>, n: u64) {
        *self.0.entry(key.into()).or_insert(0) += n;
    }

    /// Count for a key, 0 when absent
    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Sum of all counts
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// Whether no key was counted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut tally = Self::new();
        for (k, n) in iter {
            tally.add(k, n);
        }
        tally
    }
}

/// One key where the sources disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Category key
    pub key: String,
    /// Count from the live source
    pub observed_count: u64,
    /// Count from the reference source
    pub reference_count: u64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: observed {} vs reference {}",
            self.key, self.observed_count, self.reference_count
        )
    }
}

/// Per-key differences over the union of keys, sorted by key. Empty means
/// the tallies agree.
#[must_use]
pub fn reconcile(observed: &Tally, reference: &Tally) -> Vec<Mismatch> {
    let keys: BTreeSet<&str> = observed.keys().chain(reference.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let observed_count = observed.get(key);
            let reference_count = reference.get(key);
            (observed_count != reference_count).then(|| Mismatch {
                key: key.to_string(),
                observed_count,
                reference_count,
            })
        })
        .collect()
}

/// Result of a strict content comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentComparison {
    /// Normalised texts are identical
    pub equal: bool,
    /// SHA-256 of the first normalised text
    pub first_digest: String,
    /// SHA-256 of the second normalised text
    pub second_digest: String,
    /// Normalised length of the first
    pub first_len: usize,
    /// Normalised length of the second
    pub second_len: usize,
}

/// Normalise for comparison: markup stripped, text nodes trimmed and joined
#[must_use]
pub fn normalize_content(content: &str) -> String {
    markup_text(content, "")
}

fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Compare two independently fetched artifacts. Any difference after
/// normalisation is a mismatch.
#[must_use]
pub fn compare_content(first: &str, second: &str) -> ContentComparison {
    let a = normalize_content(first);
    let b = normalize_content(second);
    ContentComparison {
        equal: a == b,
        first_digest: sha256_hex(&a),
        second_digest: sha256_hex(&b),
        first_len: a.len(),
        second_len: b.len(),
    }
}

/// How to compute a tally from a downloaded artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactTallyRule {
    /// One key per body row of an HTML table: the text of cell `column`
    /// (0-based) in each row of tables matching `selector`
    Table {
        /// CSS selector of the table
        selector: String,
        /// Cell index
        column: usize,
    },
    /// One key per text line whose first word starts with `prefix`: the
    /// word at `key_index`
    LinePrefix {
        /// First-word prefix
        prefix: String,
        /// Word index of the key
        #[serde(default = "default_key_index")]
        key_index: usize,
    },
}

const fn default_key_index() -> usize {
    1
}

impl Default for ArtifactTallyRule {
    fn default() -> Self {
        Self::LinePrefix {
            prefix: "Issue".to_string(),
            key_index: 1,
        }
    }
}

impl ArtifactTallyRule {
    /// Compute the tally for an artifact's content
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Config`] for an invalid selector, and for a
    /// table rule when no table matches
    pub fn extract(&self, content: &str) -> SleuthResult<Tally> {
        match self {
            Self::Table { selector, column } => table_tally(content, selector, *column),
            Self::LinePrefix { prefix, key_index } => {
                Ok(line_prefix_tally(content, prefix, *key_index))
            }
        }
    }
}

fn parse_selector(selector: &str) -> SleuthResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| SleuthError::config(format!("invalid selector '{selector}': {e}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn table_tally(content: &str, selector: &str, column: usize) -> SleuthResult<Tally> {
    let document = Html::parse_document(content);
    let tables = parse_selector(selector)?;
    let body_rows = parse_selector("tbody > tr")?;
    let any_rows = parse_selector("tr")?;
    let cells = parse_selector("td")?;

    let mut found_table = false;
    let mut tally = Tally::new();
    for table in document.select(&tables) {
        found_table = true;
        let mut rows: Vec<ElementRef<'_>> = table.select(&body_rows).collect();
        if rows.is_empty() {
            rows = table.select(&any_rows).collect();
        }
        for row in rows {
            if let Some(cell) = row.select(&cells).nth(column) {
                let key = cell_text(cell);
                if !key.is_empty() {
                    tally.add(key, 1);
                }
            }
        }
    }

    if !found_table {
        return Err(SleuthError::config(format!(
            "no table matches '{selector}'"
        )));
    }
    Ok(tally)
}

fn line_prefix_tally(content: &str, prefix: &str, key_index: usize) -> Tally {
    let text = if looks_like_markup(content) {
        markup_text(content, "\n")
    } else {
        content.to_string()
    };

    let keys = text.lines().filter_map(|line| {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.first() {
            Some(first) if first.starts_with(prefix) && words.len() > key_index => Some(
                words[key_index]
                    .trim_end_matches([':', ',', ';'])
                    .to_string(),
            ),
            _ => None,
        }
    });
    Tally::from_keys(keys.filter(|k| !k.is_empty()))
}

/// Tally from live UI cells: one key per matched cell, its trimmed text
///
/// # Errors
///
/// Returns driver errors
pub fn ui_tally<U: UiDriver + ?Sized>(ui: &mut U, cells: &Locator) -> SleuthResult<Tally> {
    let texts = ui.texts_of(cells)?;
    Ok(Tally::from_keys(
        texts
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::MockUi;
    use proptest::prelude::*;

    fn tally(entries: &[(&str, u64)]) -> Tally {
        entries.iter().map(|(k, n)| (*k, *n)).collect()
    }

    mod reconcile_tests {
        use super::*;

        #[test]
        fn test_identical_tallies_agree() {
            let t = tally(&[("High", 3), ("Low", 1)]);
            assert!(reconcile(&t, &t).is_empty());
        }

        #[test]
        fn test_missing_key_counts_as_zero() {
            let observed = tally(&[("High", 3)]);
            let reference = tally(&[("High", 2), ("Low", 1)]);
            let mismatches = reconcile(&observed, &reference);
            assert_eq!(
                mismatches,
                vec![
                    Mismatch {
                        key: "High".into(),
                        observed_count: 3,
                        reference_count: 2
                    },
                    Mismatch {
                        key: "Low".into(),
                        observed_count: 0,
                        reference_count: 1
                    },
                ]
            );
        }

        #[test]
        fn test_mismatch_display() {
            let m = Mismatch {
                key: "Medium".into(),
                observed_count: 1,
                reference_count: 4,
            };
            assert_eq!(m.to_string(), "Medium: observed 1 vs reference 4");
        }

        #[test]
        fn test_tally_json_is_plain_map() {
            let t = tally(&[("High", 2)]);
            assert_eq!(serde_json::to_string(&t).unwrap(), r#"{"High":2}"#);
            let back: Tally = serde_json::from_str(r#"{"Low":5}"#).unwrap();
            assert_eq!(back.get("Low"), 5);
        }
    }

    mod content_tests {
        use super::*;

        #[test]
        fn test_same_content_different_layout() {
            let a = "<html><body><h1>Report</h1><p>Issue High</p></body></html>";
            let b = "<html>\n<body>\n  <h1> Report </h1>\n  <p>Issue High</p>\n</body>\n</html>";
            let cmp = compare_content(a, b);
            assert!(cmp.equal);
            assert_eq!(cmp.first_digest, cmp.second_digest);
            assert_eq!(cmp.first_digest.len(), 64);
        }

        #[test]
        fn test_different_content_detected() {
            let cmp = compare_content("<p>Issue High</p>", "<p>Issue Low</p>");
            assert!(!cmp.equal);
            assert_ne!(cmp.first_digest, cmp.second_digest);
        }
    }

    mod extraction_tests {
        use super::*;

        const REPORT: &str = r#"
            <html><body>
            <table class="custom-table">
              <thead><tr><th>Issue</th><th>Severity</th></tr></thead>
              <tbody>
                <tr><td>1</td><td>High</td></tr>
                <tr><td>2</td><td> Low </td></tr>
                <tr><td>3</td><td>High</td></tr>
              </tbody>
            </table>
            <p>Issue High: unchecked input</p>
            <p>Issue Low: naming</p>
            <p>Issues are listed above</p>
            </body></html>"#;

        #[test]
        fn test_table_rule() {
            let rule = ArtifactTallyRule::Table {
                selector: "table.custom-table".into(),
                column: 1,
            };
            let t = rule.extract(REPORT).unwrap();
            assert_eq!(t, tally(&[("High", 2), ("Low", 1)]));
        }

        #[test]
        fn test_table_rule_without_table_fails() {
            let rule = ArtifactTallyRule::Table {
                selector: "table.nope".into(),
                column: 1,
            };
            assert!(rule.extract(REPORT).is_err());
        }

        #[test]
        fn test_line_prefix_rule_on_markup() {
            let t = ArtifactTallyRule::default().extract(REPORT).unwrap();
            // "Issues are listed above" also starts with "Issue"
            assert_eq!(t.get("High"), 1);
            assert_eq!(t.get("Low"), 1);
            assert_eq!(t.get("are"), 1);
        }

        #[test]
        fn test_line_prefix_rule_on_text() {
            let text = "Issue Critical  x\nIssue Critical y\n  Issue Minor z\nnothing\nIssue";
            let t = ArtifactTallyRule::default().extract(text).unwrap();
            assert_eq!(t, tally(&[("Critical", 2), ("Minor", 1)]));
        }

        #[test]
        fn test_rule_from_yaml() {
            let rule: ArtifactTallyRule =
                crate::config::from_yaml_str("table:\n  selector: table.custom-table\n  column: 1\n")
                    .unwrap();
            assert!(matches!(rule, ArtifactTallyRule::Table { column: 1, .. }));
            let rule: ArtifactTallyRule =
                crate::config::from_yaml_str("line_prefix:\n  prefix: Issue\n").unwrap();
            assert_eq!(rule, ArtifactTallyRule::default());
        }

        #[test]
        fn test_ui_tally() {
            let mut ui = MockUi::new();
            let cells = Locator::xpath("//table[@class='custom-table']/tbody/tr/td[2]");
            ui.set_list(
                cells.clone(),
                vec!["High".into(), " High ".into(), "Low".into(), String::new()],
            );
            let t = ui_tally(&mut ui, &cells).unwrap();
            assert_eq!(t, tally(&[("High", 2), ("Low", 1)]));
        }
    }

    proptest! {
        #[test]
        fn prop_reconcile_self_is_empty(entries in proptest::collection::btree_map("[A-Z][a-z]{0,6}", 0u64..50, 0..8)) {
            let t: Tally = entries.into_iter().collect();
            prop_assert!(reconcile(&t, &t).is_empty());
        }

        #[test]
        fn prop_mismatches_sorted_and_unique(
            a in proptest::collection::btree_map("[a-d]", 0u64..5, 0..4),
            b in proptest::collection::btree_map("[a-d]", 0u64..5, 0..4),
        ) {
            let observed: Tally = a.into_iter().collect();
            let reference: Tally = b.into_iter().collect();
            let mismatches = reconcile(&observed, &reference);
            let keys: Vec<&str> = mismatches.iter().map(|m| m.key.as_str()).collect();
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(keys, sorted);
            for m in &mismatches {
                prop_assert_ne!(m.observed_count, m.reference_count);
            }
        }
    }
}

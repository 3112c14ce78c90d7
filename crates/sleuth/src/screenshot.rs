//! Screenshot recording for stage outcomes.
//!
//! Captures go under `<root>/success/` or `<root>/failure/` as
//! `{status}_{tag}_{YYYYmmdd_HHMMSS}.png`. A failed capture is logged and
//! never propagates: evidence gathering must not change a run's outcome.

use crate::clock::SharedClock;
use crate::driver::UiDriver;
use crate::result::SleuthResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which directory a capture lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotStatus {
    /// Stage completed
    Success,
    /// Stage failed
    Failure,
}

impl ShotStatus {
    /// Directory and file-name prefix
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for ShotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; whitespace becomes `_`
#[must_use]
pub fn sanitize_tag(tag: &str) -> String {
    tag.trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect()
}

/// Writes screenshots into status directories
#[derive(Debug, Clone)]
pub struct ScreenshotRecorder {
    root: PathBuf,
    clock: SharedClock,
}

impl ScreenshotRecorder {
    /// Record under `root`
    pub fn new(root: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a capture would be written to now
    #[must_use]
    pub fn path_for(&self, status: ShotStatus, tag: &str) -> PathBuf {
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let stem = format!("{status}_{}_{stamp}", sanitize_tag(tag));
        let dir = self.root.join(status.as_str());

        let mut path = dir.join(format!("{stem}.png"));
        let mut n = 2;
        while path.exists() {
            path = dir.join(format!("{stem}_{n}.png"));
            n += 1;
        }
        path
    }

    fn try_capture<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        status: ShotStatus,
        tag: &str,
    ) -> SleuthResult<PathBuf> {
        let data = ui.screenshot()?;
        let path = self.path_for(status, tag);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data)?;
        Ok(path)
    }

    /// Capture the current page. Failures are logged and yield `None`.
    pub fn capture<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        status: ShotStatus,
        tag: &str,
    ) -> Option<PathBuf> {
        match self.try_capture(ui, status, tag) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "screenshot saved");
                Some(path)
            }
            Err(err) => {
                tracing::error!(tag, status = %status, error = %err, "failed to capture screenshot");
                None
            }
        }
    }
}

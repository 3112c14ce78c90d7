//! Downloaded artifacts.
//!
//! Browsers write downloads into a directory asynchronously. The store finds
//! the newest file with a given extension, waiting for it to show up, and a
//! [`DownloadTracker`] keeps successive downloads apart.

use crate::backoff::AttemptBudget;
use crate::poll::{BoundedPoller, CancellationToken, Observation};
use crate::result::{SleuthError, SleuthResult};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A file found in a download directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Full path
    pub path: PathBuf,
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    #[serde(skip)]
    pub modified: SystemTime,
}

impl Artifact {
    fn from_path(path: PathBuf) -> SleuthResult<Self> {
        let meta = std::fs::metadata(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self {
            name,
            size: meta.len(),
            modified: meta.modified()?,
            path,
        })
    }

    /// Check if the file is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(wanted))
}

/// Files in `dir` with `extension`, newest first. A missing directory is
/// empty, not an error.
///
/// # Errors
///
/// Returns IO errors other than a missing directory
pub fn list_files(dir: &Path, extension: &str) -> SleuthResult<Vec<Artifact>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extension) {
            files.push(Artifact::from_path(path)?);
        }
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Read an artifact as text; invalid UTF-8 is replaced
///
/// # Errors
///
/// Returns IO errors
pub fn read(path: &Path) -> SleuthResult<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Fail when the artifact has no content
///
/// # Errors
///
/// Returns [`SleuthError::StageFailure`] for an empty file
pub fn ensure_non_empty(artifact: &Artifact) -> SleuthResult<()> {
    if artifact.is_empty() {
        return Err(SleuthError::stage(
            "download",
            format!("{} is empty", artifact.path.display()),
        ));
    }
    Ok(())
}

/// Waits for downloads to land in a directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    poller: BoundedPoller,
    interval: Duration,
}

impl ArtifactStore {
    /// Create a store polling every second
    #[must_use]
    pub fn new(poller: BoundedPoller) -> Self {
        Self {
            poller: poller.with_label("artifact"),
            interval: Duration::from_secs(1),
        }
    }

    /// Poll interval while waiting
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn budget(&self) -> AttemptBudget {
        AttemptBudget::fixed(u32::MAX, self.interval).unwrap_or_else(|_| AttemptBudget::once())
    }

    /// Newest file with `extension` in `dir`, waiting up to `timeout` for one
    /// to appear.
    ///
    /// # Errors
    ///
    /// Returns `ObservationFailed` when the directory could never be read
    pub fn latest_file(
        &self,
        dir: &Path,
        extension: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SleuthResult<Option<Artifact>> {
        self.await_matching(dir, extension, timeout, cancel, |_| true)
    }

    /// Newest file the tracker has not seen, waiting up to `timeout`. The
    /// returned file is marked seen.
    ///
    /// # Errors
    ///
    /// Returns `ObservationFailed` when the directory could never be read
    pub fn next_download(
        &self,
        tracker: &mut DownloadTracker,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SleuthResult<Option<Artifact>> {
        let found = self.await_matching(
            &tracker.dir,
            &tracker.extension,
            timeout,
            cancel,
            |a| !tracker.is_seen(&a.path),
        )?;
        if let Some(artifact) = &found {
            tracker.accept(artifact);
        }
        Ok(found)
    }

    fn await_matching<P>(
        &self,
        dir: &Path,
        extension: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        accept: P,
    ) -> SleuthResult<Option<Artifact>>
    where
        P: Fn(&Artifact) -> bool,
    {
        let outcome = self.poller.poll(
            || {
                let newest = list_files(dir, extension)?.into_iter().find(|a| accept(a));
                Ok(match newest {
                    Some(artifact) => Observation::Satisfied(Some(artifact)),
                    None => Observation::Pending(None),
                })
            },
            &self.budget(),
            Some(timeout),
            cancel,
        )?;

        if !outcome.satisfied {
            tracing::warn!(
                stage = "download",
                dir = %dir.display(),
                extension,
                attempts = outcome.attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "no {extension} file appeared"
            );
        }
        Ok(outcome.into_satisfied().flatten())
    }
}

/// Remembers which files in a download directory were already consumed
#[derive(Debug, Clone)]
pub struct DownloadTracker {
    dir: PathBuf,
    extension: String,
    seen: HashSet<PathBuf>,
}

impl DownloadTracker {
    /// Track `dir` for files with `extension`
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            seen: HashSet::new(),
        }
    }

    /// Mark every file already present as seen
    ///
    /// # Errors
    ///
    /// Returns IO errors from listing the directory
    pub fn snapshot(&mut self) -> SleuthResult<usize> {
        let files = list_files(&self.dir, &self.extension)?;
        let count = files.len();
        self.seen.extend(files.into_iter().map(|a| a.path));
        Ok(count)
    }

    /// Whether a path was already consumed
    #[must_use]
    pub fn is_seen(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    /// Mark an artifact consumed; false if it already was
    pub fn accept(&mut self, artifact: &Artifact) -> bool {
        self.seen.insert(artifact.path.clone())
    }

    /// Tracked directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::fs::File;
    use tempfile::TempDir;

    fn write_at(dir: &Path, name: &str, content: &str, secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
        path
    }

    fn store(clock: &FakeClock) -> ArtifactStore {
        ArtifactStore::new(BoundedPoller::new(clock.shared()))
    }

    mod listing_tests {
        use super::*;

        #[test]
        fn test_newest_first_with_extension_filter() {
            let tmp = TempDir::new().unwrap();
            write_at(tmp.path(), "old.html", "a", 1_000);
            write_at(tmp.path(), "new.HTML", "b", 3_000);
            write_at(tmp.path(), "other.txt", "c", 5_000);
            write_at(tmp.path(), "partial.html.crdownload", "d", 6_000);

            let names: Vec<String> = list_files(tmp.path(), ".html")
                .unwrap()
                .into_iter()
                .map(|a| a.name)
                .collect();
            assert_eq!(names, vec!["new.HTML", "old.html"]);
        }

        #[test]
        fn test_missing_dir_is_empty() {
            let tmp = TempDir::new().unwrap();
            assert!(list_files(&tmp.path().join("nope"), "html")
                .unwrap()
                .is_empty());
        }

        #[test]
        fn test_empty_file_rejected() {
            let tmp = TempDir::new().unwrap();
            let path = write_at(tmp.path(), "empty.html", "", 1);
            let artifact = Artifact::from_path(path).unwrap();
            assert!(matches!(
                ensure_non_empty(&artifact),
                Err(SleuthError::StageFailure { .. })
            ));
        }

        #[test]
        fn test_read_lossy() {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("bin.html");
            std::fs::write(&path, [b'o', b'k', 0xFF]).unwrap();
            assert_eq!(read(&path).unwrap(), "ok\u{FFFD}");
        }
    }

    mod store_tests {
        use super::*;

        #[test]
        fn test_latest_file_present() {
            let tmp = TempDir::new().unwrap();
            write_at(tmp.path(), "a.html", "x", 10);
            write_at(tmp.path(), "b.html", "y", 20);
            let clock = FakeClock::new();
            let found = store(&clock)
                .latest_file(
                    tmp.path(),
                    "html",
                    Duration::from_secs(30),
                    &CancellationToken::new(),
                )
                .unwrap()
                .unwrap();
            assert_eq!(found.name, "b.html");
            assert_eq!(clock.total_slept(), Duration::ZERO);
        }

        #[test]
        fn test_latest_file_times_out() {
            let tmp = TempDir::new().unwrap();
            let clock = FakeClock::new();
            let found = store(&clock)
                .latest_file(
                    tmp.path(),
                    "html",
                    Duration::from_secs(5),
                    &CancellationToken::new(),
                )
                .unwrap();
            assert!(found.is_none());
            assert_eq!(clock.total_slept(), Duration::from_secs(5));
        }

        #[test]
        fn test_tracker_skips_seen_files() {
            let tmp = TempDir::new().unwrap();
            write_at(tmp.path(), "before.html", "old", 10);
            let mut tracker = DownloadTracker::new(tmp.path(), "html");
            assert_eq!(tracker.snapshot().unwrap(), 1);

            let clock = FakeClock::new();
            let store = store(&clock);
            let cancel = CancellationToken::new();
            assert!(store
                .next_download(&mut tracker, Duration::from_secs(2), &cancel)
                .unwrap()
                .is_none());

            write_at(tmp.path(), "first.html", "one", 20);
            let first = store
                .next_download(&mut tracker, Duration::from_secs(2), &cancel)
                .unwrap()
                .unwrap();
            assert_eq!(first.name, "first.html");

            // An older file still counts when it was never consumed
            write_at(tmp.path(), "second.html", "two", 15);
            let second = store
                .next_download(&mut tracker, Duration::from_secs(2), &cancel)
                .unwrap()
                .unwrap();
            assert_eq!(second.name, "second.html");
            assert!(!tracker.accept(&second));
        }
    }
}

//! Admission control: suppression marker and startup jitter.
//!
//! The suppression marker is a plain file at a well-known path; its
//! modification time is the only state consulted. While the marker exists
//! and is younger than the configured window, new runs must no-op. An
//! expired marker is removed and the run proceeds, so a crashed `suppress`
//! caller cannot block collection forever.
//!
//! Concurrent `suppress()`/`resume()` calls are not safe against each other;
//! serialize them at the call site.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

/// Default maximum age of the suppression marker.
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(20 * 60);

/// Error type for admission operations.
#[derive(Debug)]
pub enum AdmissionError {
    /// The marker could not be created or probed. Fatal.
    MarkerWrite(io::Error),
    /// `resume()` was called with no marker present. Signals misuse.
    NotSuppressed(PathBuf),
    /// The marker could not be removed.
    MarkerRemove(io::Error),
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::MarkerWrite(e) => write!(f, "cannot write suppression marker: {}", e),
            AdmissionError::NotSuppressed(path) => {
                write!(f, "no suppression marker at {}", path.display())
            }
            AdmissionError::MarkerRemove(e) => {
                write!(f, "cannot remove suppression marker: {}", e)
            }
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Gate decision for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the run may proceed at all.
    pub proceed: bool,
    /// Randomized startup delay the caller must block for before any
    /// collection work begins.
    pub delay: Duration,
}

/// Decides whether a collection run proceeds and applies startup jitter.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    marker_path: PathBuf,
    max_window: Duration,
}

impl AdmissionController {
    /// Creates a controller for the given marker path and staleness window.
    pub fn new(marker_path: impl Into<PathBuf>, max_window: Duration) -> Self {
        Self {
            marker_path: marker_path.into(),
            max_window,
        }
    }

    /// The conventional marker location under the OS temp directory.
    pub fn default_marker_path() -> PathBuf {
        std::env::temp_dir().join("vmflux.pause")
    }

    /// Path of the marker this controller manages.
    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Gate decision: suppressed runs must exit without side effects.
    ///
    /// An expired marker is removed here as a side effect (fail-open after a
    /// bounded staleness window). With `jitter_max_secs > 0` the returned
    /// delay is drawn uniformly from `[1, jitter_max_secs]` seconds.
    pub fn should_run(&self, jitter_max_secs: u64) -> Result<Admission, AdmissionError> {
        if let Ok(meta) = fs::metadata(&self.marker_path) {
            // An unreadable mtime counts as age zero: stay suppressed rather
            // than ignore a marker we cannot date.
            let age = meta
                .modified()
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or(Duration::ZERO);

            if age < self.max_window {
                info!(
                    marker = %self.marker_path.display(),
                    age_secs = age.as_secs(),
                    "collection suppressed"
                );
                return Ok(Admission {
                    proceed: false,
                    delay: Duration::ZERO,
                });
            }

            warn!(
                marker = %self.marker_path.display(),
                age_secs = age.as_secs(),
                "stale suppression marker, removing and proceeding"
            );
            fs::remove_file(&self.marker_path).map_err(AdmissionError::MarkerRemove)?;
        }

        let delay = if jitter_max_secs > 0 {
            Duration::from_secs(rand::rng().random_range(1..=jitter_max_secs))
        } else {
            Duration::ZERO
        };
        debug!(delay_secs = delay.as_secs(), "admission granted");
        Ok(Admission {
            proceed: true,
            delay,
        })
    }

    /// Creates (or refreshes) the suppression marker. Idempotent.
    pub fn suppress(&self) -> Result<(), AdmissionError> {
        fs::write(&self.marker_path, b"").map_err(AdmissionError::MarkerWrite)?;
        info!(marker = %self.marker_path.display(), "collection suppressed until resumed or expired");
        Ok(())
    }

    /// Removes the suppression marker.
    ///
    /// Calling this with no marker present is an error: it signals misuse,
    /// not a crash condition.
    pub fn resume(&self) -> Result<(), AdmissionError> {
        match fs::remove_file(&self.marker_path) {
            Ok(()) => {
                info!(marker = %self.marker_path.display(), "collection resumed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(AdmissionError::NotSuppressed(self.marker_path.clone()))
            }
            Err(e) => Err(AdmissionError::MarkerRemove(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(dir: &tempfile::TempDir, window: Duration) -> AdmissionController {
        AdmissionController::new(dir.path().join("vmflux.pause"), window)
    }

    #[test]
    fn test_no_marker_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, DEFAULT_SUPPRESSION_WINDOW);
        let decision = adm.should_run(0).unwrap();
        assert!(decision.proceed);
        assert_eq!(decision.delay, Duration::ZERO);
    }

    #[test]
    fn test_fresh_marker_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, DEFAULT_SUPPRESSION_WINDOW);
        adm.suppress().unwrap();

        let decision = adm.should_run(30).unwrap();
        assert!(!decision.proceed);
        assert_eq!(decision.delay, Duration::ZERO);
        // Marker stays in place while it is still young.
        assert!(adm.marker_path().exists());
    }

    #[test]
    fn test_expired_marker_removed_and_proceeds() {
        // A zero-length window makes any marker age >= the window, which is
        // the "created 25 minutes ago, window 20" case without clock games.
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, Duration::ZERO);
        adm.suppress().unwrap();

        let decision = adm.should_run(0).unwrap();
        assert!(decision.proceed);
        assert!(!adm.marker_path().exists());
    }

    #[test]
    fn test_resume_reopens_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, DEFAULT_SUPPRESSION_WINDOW);
        adm.suppress().unwrap();
        assert!(!adm.should_run(0).unwrap().proceed);

        adm.resume().unwrap();
        assert!(adm.should_run(0).unwrap().proceed);
    }

    #[test]
    fn test_suppress_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, DEFAULT_SUPPRESSION_WINDOW);
        adm.suppress().unwrap();
        adm.suppress().unwrap();
        assert!(adm.marker_path().exists());
    }

    #[test]
    fn test_resume_without_marker_is_misuse() {
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, DEFAULT_SUPPRESSION_WINDOW);
        assert!(matches!(
            adm.resume(),
            Err(AdmissionError::NotSuppressed(_))
        ));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let adm = controller(&dir, DEFAULT_SUPPRESSION_WINDOW);
        for _ in 0..50 {
            let decision = adm.should_run(5).unwrap();
            let secs = decision.delay.as_secs();
            assert!((1..=5).contains(&secs), "delay {} out of [1, 5]", secs);
        }
    }
}

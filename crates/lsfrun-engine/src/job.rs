//! Job specifications and identities.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use anyhow::bail;
use uuid::Uuid;

/// The prefix of every staged job script name.
pub const JOB_SCRIPT_PREFIX: &str = "JOB-";

/// The default interval between job status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Splits a comma-delimited list, trimming each entry and dropping empty
/// entries.
///
/// ```
/// use lsfrun_engine::job::split_list;
///
/// assert_eq!(split_list(" a.txt, b.txt ,,"), ["a.txt", "b.txt"]);
/// assert!(split_list("").is_empty());
/// ```
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Represents the immutable description of a single job execution.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// The body of the job script.
    pub script: String,
    /// The controller-local files to send to the remote node before the job
    /// is submitted.
    pub files_to_send: Vec<PathBuf>,
    /// The remote files to download once the job has finished.
    ///
    /// Relative paths are relative to the remote execution directory.
    pub files_to_download: Vec<String>,
    /// The directory downloaded files are placed in.
    ///
    /// When `None`, downloads are placed in the run's own directory.
    pub download_destination: Option<PathBuf>,
    /// The delay between job status queries.
    pub poll_interval: Duration,
    /// Whether the scheduler should notify the submitting user by email when
    /// the job completes.
    pub notify_on_completion: bool,
    /// The execution label the run requires.
    ///
    /// The label selects which configured cloud provides the queue class.
    pub label: Option<String>,
}

impl JobSpec {
    /// Creates a job specification for the given script body with no file
    /// transfers and the default poll interval.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            files_to_send: Vec::new(),
            files_to_download: Vec::new(),
            download_destination: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify_on_completion: false,
            label: None,
        }
    }

    /// Validates the job specification.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("the job poll interval cannot be zero");
        }

        if self.script.trim().is_empty() {
            bail!("the job script cannot be empty");
        }

        Ok(())
    }
}

/// Represents the randomly generated identity of a single job execution.
///
/// The identity names the staged job script (`JOB-<uuid>`) so concurrent runs
/// that share a remote node never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobIdentity(String);

impl JobIdentity {
    /// Generates a new unique job identity.
    pub fn generate() -> Self {
        Self(format!("{JOB_SCRIPT_PREFIX}{id}", id = Uuid::new_v4()))
    }

    /// Gets the identity as a string.
    ///
    /// This is also the file name of the staged job script.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Gets the file name of a scheduler-owned file derived from this identity
    /// (e.g. `JOB-<uuid>.out`).
    pub fn with_extension(&self, extension: &str) -> String {
        format!("{id}.{extension}", id = self.0)
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn identities_are_unique_and_prefixed() {
        let first = JobIdentity::generate();
        let second = JobIdentity::generate();
        assert_ne!(first, second);
        assert!(first.as_str().starts_with(JOB_SCRIPT_PREFIX));
        assert_eq!(first.with_extension("out"), format!("{first}.out"));
    }

    #[test]
    fn list_splitting() {
        assert_eq!(split_list("a,b"), ["a", "b"]);
        assert_eq!(split_list(" /tmp/a , ,b "), ["/tmp/a", "b"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn spec_validation() {
        let mut spec = JobSpec::new("echo hi");
        spec.validate().expect("spec should validate");

        spec.poll_interval = Duration::ZERO;
        assert_eq!(
            spec.validate().unwrap_err().to_string(),
            "the job poll interval cannot be zero"
        );

        let spec = JobSpec::new("  \n");
        assert_eq!(
            spec.validate().unwrap_err().to_string(),
            "the job script cannot be empty"
        );
    }
}

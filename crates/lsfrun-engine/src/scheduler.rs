//! Capability interface to external batch schedulers.
//!
//! Each scheduler family (LSF, and in the future others) is one
//! implementation of [`SchedulerAdapter`]. The orchestrator only ever talks to
//! the trait, so adding a scheduler never requires touching the orchestration
//! logic.
//!
//! Scheduler operations that produce output for the controller (the `create_*`
//! methods) write it to the run's communication file; the caller retrieves it
//! with [`CommunicationChannel::retrieve`](crate::CommunicationChannel::retrieve).

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::JobIdentity;
use crate::JobLog;

pub mod lsf;

/// The status token forced onto a job that was cancelled by the caller.
pub const ABORTED_STATUS: &str = "ABORTED";

/// Represents a scheduler-reported job status token.
///
/// The token is scheduler-specific; only the [`SchedulerAdapter`] that
/// produced it knows how to classify it. An unset (empty) status is never
/// terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JobStatus(String);

impl JobStatus {
    /// Creates a status from a scheduler-reported token.
    ///
    /// Surrounding whitespace is trimmed.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(token.as_ref().trim().to_string())
    }

    /// The status of a job that has not been queried yet.
    pub fn unset() -> Self {
        Self::default()
    }

    /// The status forced onto a job that was cancelled.
    pub fn aborted() -> Self {
        Self(ABORTED_STATUS.to_string())
    }

    /// Gets the status token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Determines if the status has never been set.
    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The classification of a [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// The job is queued or suspended before producing output.
    Pending,
    /// The job is running and producing output.
    Running,
    /// The job finished successfully.
    Succeeded,
    /// The job finished with errors, was killed, or was aborted.
    Failed,
    /// The status is unknown to the scheduler adapter (including an unset
    /// status).
    Unknown,
}

impl StatusClass {
    /// Determines if the class is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Represents the scheduler-assigned handle of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobHandle {
    /// The scheduler's job identifier.
    id: String,
    /// The identity of the execution that submitted the job.
    identity: JobIdentity,
}

impl RemoteJobHandle {
    /// Creates a new job handle.
    pub fn new(id: impl Into<String>, identity: JobIdentity) -> Self {
        Self {
            id: id.into(),
            identity,
        }
    }

    /// Gets the scheduler's job identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Gets the identity of the execution that submitted the job.
    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }
}

impl fmt::Display for RemoteJobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// An error from submitting a job to a scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The submission command exited with a nonzero status.
    #[error("job submission failed with exit code {exit_code}: {output}")]
    Rejected {
        /// The exit code of the submission command.
        exit_code: i32,
        /// The output of the submission command.
        output: String,
    },
    /// The submission command succeeded but did not report a job identifier.
    #[error("job submission did not report a job identifier: {output}")]
    MissingJobId {
        /// The output of the submission command.
        output: String,
    },
    /// The submission command could not be run on the remote node.
    #[error("failed to run the job submission command")]
    Remote(#[source] anyhow::Error),
}

/// A capability interface to one external batch scheduler.
#[async_trait]
pub trait SchedulerAdapter: fmt::Debug + Send + Sync {
    /// Gets the display name of the scheduler.
    fn name(&self) -> &str;

    /// Submits the staged job script named by `identity`.
    ///
    /// `queue_class` selects the scheduler queue; `None` submits without a
    /// queue and leaves the choice to the scheduler.
    async fn submit_job(
        &self,
        identity: &JobIdentity,
        notify_on_completion: bool,
        queue_class: Option<&str>,
    ) -> Result<RemoteJobHandle, SubmissionError>;

    /// Queries the current status of a job.
    async fn get_job_status(&self, handle: &RemoteJobHandle) -> Result<JobStatus>;

    /// Classifies a status token reported by this scheduler.
    fn classify(&self, status: &JobStatus) -> StatusClass;

    /// Determines if the status is terminal.
    fn is_end_status(&self, status: &JobStatus) -> bool {
        self.classify(status).is_terminal()
    }

    /// Determines if the status is a running status.
    fn is_running_status(&self, status: &JobStatus) -> bool {
        self.classify(status) == StatusClass::Running
    }

    /// Determines if the status is a terminal failure (including an aborted
    /// job).
    fn job_exited_with_errors(&self, status: &JobStatus) -> bool {
        self.classify(status) == StatusClass::Failed
    }

    /// Determines if the status is a terminal success.
    fn job_completed_successfully(&self, status: &JobStatus) -> bool {
        self.classify(status) == StatusClass::Succeeded
    }

    /// Gets a human-readable explanation of a status, if the scheduler has
    /// one worth reporting.
    fn status_detail(&self, _status: &JobStatus) -> Option<&'static str> {
        None
    }

    /// Materializes the job's current output into the file `target` in the
    /// remote working directory.
    async fn create_job_progress_file(
        &self,
        handle: &RemoteJobHandle,
        target: &str,
    ) -> Result<()>;

    /// Extracts the zero-based, half-open line range `[from, to)` of the
    /// progress file `source` into the communication file.
    async fn create_formatted_running_job_output_file(
        &self,
        source: &str,
        from: u64,
        to: u64,
    ) -> Result<()>;

    /// Extracts the output of a finished job from line `from` to the end into
    /// the communication file.
    async fn create_finished_job_output_file(
        &self,
        handle: &RemoteJobHandle,
        from: u64,
    ) -> Result<()>;

    /// Requests that the job be killed.
    ///
    /// This is best-effort: a job that already finished is not an error.
    async fn kill_job(&self, handle: &RemoteJobHandle) -> Result<()>;

    /// Writes the job's error log to the job log.
    async fn print_error_log(&self, handle: &RemoteJobHandle, log: &JobLog) -> Result<()>;

    /// Writes the job's exit code, if the scheduler recorded one, to the job
    /// log.
    async fn print_exit_code(&self, handle: &RemoteJobHandle, log: &JobLog) -> Result<()>;
}

//! The job lifecycle state machine.
//!
//! A job moves through the following states:
//!
//! ```text
//! Staging -> Submitted -> Polling -> Terminal(Succeeded | Failed | Aborted)
//! ```
//!
//! * **Staging**: the queue class is resolved from the configured clouds, the
//!   remote working directory is queried, and the inputs and job script are
//!   staged on the remote node.
//! * **Submitted**: the job script is submitted exactly once.
//! * **Polling**: the job status is queried every poll interval; while the job
//!   runs, its output is streamed with a [`ProgressTracker`].
//! * **Terminal**: the remaining output is flushed and requested outputs are
//!   downloaded. A failed job has its diagnostics written to the job log.
//!
//! Cancellation is observed through a [`CancellationToken`]: before
//! submission it abandons staging, after submission it kills the job and
//! forces the `ABORTED` status. Cleanup runs exactly once on every path,
//! including a panic in the lifecycle itself.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::CleanupCoordinator;
use crate::CommunicationChannel;
use crate::FileStagingManager;
use crate::JobEvent;
use crate::JobIdentity;
use crate::JobLog;
use crate::JobSpec;
use crate::ProgressTracker;
use crate::StagingError;
use crate::config::CloudConfig;
use crate::config::resolve_queue_class;
use crate::scheduler::JobStatus;
use crate::scheduler::RemoteJobHandle;
use crate::scheduler::SchedulerAdapter;
use crate::scheduler::SubmissionError;

/// An error from orchestrating a job.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// The job specification is invalid.
    #[error("invalid job specification")]
    InvalidSpec(#[source] anyhow::Error),
    /// Moving files to or from the remote node failed.
    #[error("failed to stage job files")]
    Staging(#[from] StagingError),
    /// Submission failed; nothing is running.
    #[error("failed to submit the job")]
    Submission(#[from] SubmissionError),
    /// A remote call failed after the job was submitted.
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
    /// The run was cancelled before a job was submitted.
    #[error("the job was cancelled before it was submitted")]
    Cancelled,
}

/// The result type for orchestration.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// The terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The job completed successfully.
    Succeeded,
    /// The job finished with errors.
    Failed,
    /// The job was cancelled and killed.
    Aborted,
}

/// The result of a job that reached a terminal state.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// The identity of the execution.
    pub identity: JobIdentity,
    /// The scheduler handle of the job.
    pub handle: RemoteJobHandle,
    /// The last status of the job.
    pub status: JobStatus,
    /// The terminal outcome of the job.
    pub outcome: Outcome,
}

impl JobOutcome {
    /// Determines if the job completed successfully.
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

/// The mutable state of a single execution.
///
/// The state is created when orchestration starts and is discarded when it
/// returns; cleanup reads what staging recorded here.
#[derive(Debug, Default)]
pub struct JobState {
    /// The last observed status of the job.
    pub status: JobStatus,
    /// The progress of the job's streamed output.
    pub progress: ProgressTracker,
    /// The remote working directory, once resolved.
    pub working_directory: Option<String>,
    /// The names of the per-run input copies in the shared script area.
    pub per_run_names: Vec<String>,
    /// Whether the job was cancelled after it was submitted.
    pub aborted: bool,
}

/// Runs a fallible future unless the token is cancelled first.
async fn cancellable<T, E>(
    token: &CancellationToken,
    future: impl Future<Output = Result<T, E>>,
) -> OrchestrationResult<T>
where
    E: Into<OrchestrationError>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(OrchestrationError::Cancelled),
        result = future => result.map_err(Into::into),
    }
}

/// Orchestrates the lifecycle of jobs on one scheduler.
#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    /// The scheduler jobs are submitted to.
    scheduler: Arc<dyn SchedulerAdapter>,
    /// The channel command output is shuttled back through.
    ///
    /// Its local directory is the run's own storage directory.
    channel: CommunicationChannel,
    /// The staging manager.
    staging: FileStagingManager,
    /// The cleanup coordinator.
    cleanup: CleanupCoordinator,
    /// The clouds used to resolve the queue class.
    clouds: Vec<CloudConfig>,
    /// The job log.
    log: JobLog,
}

impl JobOrchestrator {
    /// Constructs a new job orchestrator.
    pub fn new(
        scheduler: Arc<dyn SchedulerAdapter>,
        channel: CommunicationChannel,
        staging: FileStagingManager,
        cleanup: CleanupCoordinator,
    ) -> Self {
        Self {
            scheduler,
            channel,
            staging,
            cleanup,
            clouds: Vec::new(),
            log: JobLog::disabled(),
        }
    }

    /// Sets the clouds used to resolve the queue class.
    pub fn with_clouds(mut self, clouds: impl IntoIterator<Item = CloudConfig>) -> Self {
        self.clouds = clouds.into_iter().collect();
        self
    }

    /// Sets the job log.
    pub fn with_log(mut self, log: JobLog) -> Self {
        self.log = log;
        self
    }

    /// Runs a job to completion and reports whether it succeeded.
    ///
    /// Any error is written to the job log before `false` is returned.
    pub async fn perform(&self, spec: &JobSpec, token: CancellationToken) -> bool {
        match self.execute(spec, token).await {
            Ok(outcome) => {
                info!(
                    job = %outcome.handle,
                    status = %outcome.status,
                    "job finished: {:?}",
                    outcome.outcome
                );
                outcome.success()
            }
            Err(OrchestrationError::Cancelled) => {
                info!("job was cancelled before it was submitted");
                self.log.message("The job was cancelled before it was submitted.");
                false
            }
            Err(e) => {
                let e = anyhow::Error::from(e);
                error!("job failed: {e:#}");
                self.log.error(format!("{e:#}"));
                false
            }
        }
    }

    /// Runs a job to completion.
    ///
    /// Cleanup has run by the time this returns, whatever the result.
    pub async fn execute(
        &self,
        spec: &JobSpec,
        token: CancellationToken,
    ) -> OrchestrationResult<JobOutcome> {
        spec.validate().map_err(OrchestrationError::InvalidSpec)?;

        let identity = JobIdentity::generate();
        info!(job = %identity, scheduler = self.scheduler.name(), "starting job");

        let mut state = JobState::default();
        let result = AssertUnwindSafe(self.drive(spec, &identity, &mut state, &token))
            .catch_unwind()
            .await;

        self.cleanup
            .cleanup(
                state.working_directory.as_deref(),
                &identity,
                &state.per_run_names,
            )
            .await;

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Drives a job from staging to a terminal state.
    async fn drive(
        &self,
        spec: &JobSpec,
        identity: &JobIdentity,
        state: &mut JobState,
        token: &CancellationToken,
    ) -> OrchestrationResult<JobOutcome> {
        let queue_class = resolve_queue_class(&self.clouds, spec.label.as_deref());
        debug!(
            queue = queue_class.as_deref().unwrap_or("<default>"),
            "resolved queue class"
        );

        let working_directory = cancellable(token, self.resolve_working_directory()).await?;
        state.working_directory = Some(working_directory.clone());

        let manifest = self.staging.manifest(spec)?;
        state.per_run_names = manifest.per_run_names();

        let preamble = cancellable(
            token,
            self.staging.send_inputs(&manifest, &working_directory),
        )
        .await?;
        cancellable(
            token,
            self.staging.write_job_script(
                identity,
                &preamble,
                &spec.script,
                &spec.files_to_download,
                &working_directory,
            ),
        )
        .await?;
        cancellable(token, self.staging.set_executable(identity)).await?;

        if token.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        let handle = self
            .scheduler
            .submit_job(identity, spec.notify_on_completion, queue_class.as_deref())
            .await?;
        info!(job = %handle, "job submitted");
        self.log.message(format!("JOB ID: {handle}"));

        match self.monitor(spec, &handle, state, token).await {
            Ok(()) => {}
            Err(OrchestrationError::Cancelled) => {
                info!(job = %handle, "job was cancelled");
                self.kill(&handle).await;
                state.status = JobStatus::aborted();
                state.aborted = true;
            }
            Err(e) => {
                // Don't leave a job running that nothing is watching anymore
                if !self.scheduler.is_end_status(&state.status) {
                    self.kill(&handle).await;
                }

                self.diagnose(&handle, &state.status).await;
                return Err(e);
            }
        }

        self.diagnose(&handle, &state.status).await;

        let outcome = if state.aborted {
            Outcome::Aborted
        } else if self.scheduler.job_completed_successfully(&state.status) {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        };

        Ok(JobOutcome {
            identity: identity.clone(),
            handle,
            status: state.status.clone(),
            outcome,
        })
    }

    /// Polls a submitted job until it reaches a terminal status, then flushes
    /// its output and downloads the requested files.
    async fn monitor(
        &self,
        spec: &JobSpec,
        handle: &RemoteJobHandle,
        state: &mut JobState,
        token: &CancellationToken,
    ) -> OrchestrationResult<()> {
        while !self.scheduler.is_end_status(&state.status) {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(OrchestrationError::Cancelled),
                _ = tokio::time::sleep(spec.poll_interval) => {}
            }

            state.status = cancellable(token, self.scheduler.get_job_status(handle)).await?;
            debug!(job = %handle, status = %state.status, "polled job status");
            self.log.status(state.status.as_str());
            if let Some(detail) = self.scheduler.status_detail(&state.status) {
                self.log.emit(JobEvent::StatusDetail(detail.to_string()));
            }

            if self.scheduler.is_running_status(&state.status) {
                cancellable(
                    token,
                    state.progress.poll_cycle(
                        self.scheduler.as_ref(),
                        &self.channel,
                        handle,
                        &self.log,
                    ),
                )
                .await?;
            }
        }

        cancellable(
            token,
            state.progress.final_flush(
                self.scheduler.as_ref(),
                &self.channel,
                handle,
                &self.log,
            ),
        )
        .await?;

        cancellable(
            token,
            self.staging
                .retrieve_outputs(spec, self.channel.local_dir(), &self.log),
        )
        .await
    }

    /// Queries the remote working directory.
    async fn resolve_working_directory(&self) -> Result<String, StagingError> {
        let captured = self
            .channel
            .capture("pwd")
            .await
            .map_err(StagingError::Remote)?;

        match captured.output.lines().next().map(str::trim) {
            Some(directory) if captured.exit_code == 0 && !directory.is_empty() => {
                debug!(directory, "resolved remote working directory");
                Ok(directory.to_string())
            }
            _ => Err(StagingError::WorkingDirectory),
        }
    }

    /// Requests that a job be killed; failure is only logged.
    async fn kill(&self, handle: &RemoteJobHandle) {
        if let Err(e) = self.scheduler.kill_job(handle).await {
            warn!(job = %handle, "failed to kill job: {e:#}");
        }
    }

    /// Writes the diagnostics of a failed job to the job log.
    ///
    /// Diagnostics are best-effort; failures are only logged.
    async fn diagnose(&self, handle: &RemoteJobHandle, status: &JobStatus) {
        if !self.scheduler.job_exited_with_errors(status) {
            return;
        }

        if let Err(e) = self.scheduler.print_error_log(handle, &self.log).await {
            warn!(job = %handle, "failed to print the job error log: {e:#}");
        }

        if let Err(e) = self.scheduler.print_exit_code(handle, &self.log).await {
            warn!(job = %handle, "failed to print the job exit code: {e:#}");
        }
    }
}

//! Implementation of the scheduler adapter for IBM Spectrum LSF.
//!
//! Every LSF command runs on the remote execution node through the run's
//! [`CommunicationChannel`]; nothing here assumes the LSF client tools are
//! installed on the controller.

use std::fmt::Write as _;
use std::sync::LazyLock;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use tracing::warn;

use super::JobStatus;
use super::RemoteJobHandle;
use super::SchedulerAdapter;
use super::StatusClass;
use super::SubmissionError;
use crate::JobIdentity;
use crate::JobLog;
use crate::session::CommunicationChannel;
use crate::session::quote;
use crate::session::quote_remote_path;

/// Matches the job identifier in the output of `bsub`.
static SUBMITTED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: this is checked statically with tests to always unwrap.
    Regex::new(r"Job <(\d+)> is submitted").unwrap()
});

/// The line LSF writes to a job's output file just before the job's own
/// output.
const OUTPUT_MARKER: &str = "The output (if any) follows:";

/// The banner `bpeek` prints before a job's standard output.
const BPEEK_BANNER: &str = "<< output from stdout >>";

/// The extension of the job's LSF output file (`bsub -oo`).
const OUTPUT_EXTENSION: &str = "out";

/// The extension of the job's LSF error file (`bsub -eo`).
const ERROR_EXTENSION: &str = "err";

/// An `awk` filter dropping the footer LSF appends to a job report whose
/// standard error went to a separate file: a `PS:` line followed by a
/// `Read file <...> for stderr output of this job.` line.
const REPORT_FOOTER_FILTER: &str = "awk '{ l[NR] = $0 } END { n = NR; \
     while (n > 0 && l[n] == \"\") n--; \
     if (n > 0 && l[n] ~ /^Read file <.*> for stderr output of this job\\.$/) { \
     m = n - 1; while (m > 0 && l[m] == \"\") m--; \
     if (m > 0 && l[m] == \"PS:\") { n = m - 1; while (n > 0 && l[n] == \"\") n-- } else n = NR \
     } else n = NR; \
     for (i = 1; i <= n; i++) print l[i] }'";

/// A [`SchedulerAdapter`] for LSF.
#[derive(Debug, Clone)]
pub struct LsfScheduler {
    /// The channel used to run LSF commands on the remote node.
    channel: CommunicationChannel,
}

impl LsfScheduler {
    /// Constructs a new LSF scheduler adapter.
    pub fn new(channel: CommunicationChannel) -> Self {
        Self { channel }
    }

    /// Gets the quoted remote execution directory.
    fn execution_directory(&self) -> String {
        quote_remote_path(self.channel.session().execution_directory())
    }

    /// Gets the quoted remote path of a file in the execution directory.
    fn execution_file(&self, name: &str) -> String {
        format!(
            "{directory}/{name}",
            directory = self.execution_directory(),
            name = quote(name)
        )
    }

    /// Builds the `bsub` command line that submits the staged script.
    fn submit_command(
        &self,
        identity: &JobIdentity,
        notify_on_completion: bool,
        queue_class: Option<&str>,
    ) -> String {
        let mut command = format!("cd {directory} && ", directory = self.execution_directory());

        // LSF mails a job report by default; only keep that when it was asked for
        if !notify_on_completion {
            command.push_str("LSB_JOB_REPORT_MAIL=N ");
        }

        command.push_str("bsub");
        if let Some(queue) = queue_class {
            let _ = write!(command, " -q {queue}", queue = quote(queue));
        }

        if notify_on_completion {
            command.push_str(" -N");
        }

        let _ = write!(
            command,
            " -J {id} -oo {out} -eo {err} ./{id} 2>&1",
            id = identity,
            out = identity.with_extension(OUTPUT_EXTENSION),
            err = identity.with_extension(ERROR_EXTENSION),
        );
        command
    }
}

#[async_trait]
impl SchedulerAdapter for LsfScheduler {
    fn name(&self) -> &str {
        "LSF"
    }

    async fn submit_job(
        &self,
        identity: &JobIdentity,
        notify_on_completion: bool,
        queue_class: Option<&str>,
    ) -> Result<RemoteJobHandle, SubmissionError> {
        let command = self.submit_command(identity, notify_on_completion, queue_class);
        debug!(command, "submitting job to LSF");

        let captured = self
            .channel
            .capture(&command)
            .await
            .map_err(SubmissionError::Remote)?;

        let output = captured.output.trim().to_string();
        if captured.exit_code != 0 {
            return Err(SubmissionError::Rejected {
                exit_code: captured.exit_code,
                output,
            });
        }

        match SUBMITTED_REGEX.captures(&output) {
            Some(captures) => Ok(RemoteJobHandle::new(&captures[1], identity.clone())),
            None => Err(SubmissionError::MissingJobId { output }),
        }
    }

    async fn get_job_status(&self, handle: &RemoteJobHandle) -> Result<JobStatus> {
        let captured = self
            .channel
            .capture(&format!("bjobs -noheader -o stat {id}", id = handle.id()))
            .await
            .with_context(|| format!("failed to query the status of LSF job `{handle}`"))?;

        if captured.exit_code != 0 {
            bail!(
                "`bjobs` exited with code {code} for LSF job `{handle}`",
                code = captured.exit_code
            );
        }

        Ok(JobStatus::new(
            captured
                .output
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default(),
        ))
    }

    fn classify(&self, status: &JobStatus) -> StatusClass {
        match status.as_str() {
            "PEND" | "PROV" | "WAIT" | "PSUSP" | "USUSP" | "SSUSP" => StatusClass::Pending,
            "RUN" => StatusClass::Running,
            "DONE" => StatusClass::Succeeded,
            "EXIT" | "ZOMBI" | super::ABORTED_STATUS => StatusClass::Failed,
            _ => StatusClass::Unknown,
        }
    }

    fn status_detail(&self, status: &JobStatus) -> Option<&'static str> {
        match status.as_str() {
            "PEND" => Some("the job is waiting in the queue to be scheduled"),
            "PROV" => Some("the job is waiting for its execution host to be provisioned"),
            "WAIT" => Some("the job is waiting for its chunk to be scheduled"),
            "PSUSP" => Some("the job was suspended by its owner or an administrator while pending"),
            "USUSP" => Some("the job was suspended by its owner or an administrator while running"),
            "SSUSP" => Some("the job was suspended by LSF because of load or queue conditions"),
            "UNKWN" => Some("LSF lost contact with the job's execution host"),
            "ZOMBI" => Some("the job was killed but LSF could not reach its execution host"),
            _ => None,
        }
    }

    async fn create_job_progress_file(
        &self,
        handle: &RemoteJobHandle,
        target: &str,
    ) -> Result<()> {
        let outcome = self
            .channel
            .session()
            .execute(&format!(
                "bpeek {id} | sed '/^{banner}$/d' > {target}",
                id = handle.id(),
                banner = BPEEK_BANNER,
                target = quote(target)
            ))
            .await
            .with_context(|| format!("failed to peek at the output of LSF job `{handle}`"))?;

        if !outcome.success() {
            debug!(
                job = handle.id(),
                exit_code = outcome.exit_code,
                "`bpeek` did not produce output"
            );
        }

        Ok(())
    }

    async fn create_formatted_running_job_output_file(
        &self,
        source: &str,
        from: u64,
        to: u64,
    ) -> Result<()> {
        self.channel
            .write(&format!(
                "awk 'NR > {from} && NR <= {to}' {source}",
                source = quote(source)
            ))
            .await
            .context("failed to extract running job output")?;
        Ok(())
    }

    async fn create_finished_job_output_file(
        &self,
        handle: &RemoteJobHandle,
        from: u64,
    ) -> Result<()> {
        let file = self.execution_file(&handle.identity().with_extension(OUTPUT_EXTENSION));

        // Skip the LSF job report header (and the blank line after it) and the
        // report footer when present
        self.channel
            .write(&format!(
                "if grep -qxF '{OUTPUT_MARKER}' {file}; then sed '1,/^{OUTPUT_MARKER}$/d' {file} \
                 | sed '1{{/^$/d}}' | {REPORT_FOOTER_FILTER}; else cat {file}; fi \
                 | awk 'NR > {from}'"
            ))
            .await
            .with_context(|| format!("failed to extract the output of LSF job `{handle}`"))?;
        Ok(())
    }

    async fn kill_job(&self, handle: &RemoteJobHandle) -> Result<()> {
        let outcome = self
            .channel
            .session()
            .execute(&format!("bkill {id}", id = handle.id()))
            .await
            .with_context(|| format!("failed to kill LSF job `{handle}`"))?;

        if !outcome.success() {
            // Killing a finished job fails; that is not an error
            warn!(
                job = handle.id(),
                exit_code = outcome.exit_code,
                "`bkill` did not kill the job"
            );
        }

        Ok(())
    }

    async fn print_error_log(&self, handle: &RemoteJobHandle, log: &JobLog) -> Result<()> {
        let file = self.execution_file(&handle.identity().with_extension(ERROR_EXTENSION));
        let captured = self
            .channel
            .capture(&format!("cat {file}"))
            .await
            .with_context(|| format!("failed to read the error log of LSF job `{handle}`"))?;

        if !captured.output.trim().is_empty() {
            log.diagnostic(format!("JOB ERROR LOG:\n{output}", output = captured.output));
        }

        Ok(())
    }

    async fn print_exit_code(&self, handle: &RemoteJobHandle, log: &JobLog) -> Result<()> {
        let captured = self
            .channel
            .capture(&format!("bjobs -noheader -o exit_code {id}", id = handle.id()))
            .await
            .with_context(|| format!("failed to query the exit code of LSF job `{handle}`"))?;

        // LSF reports `-` when the job has no exit code
        match captured.output.trim() {
            "" | "-" => {}
            code => log.diagnostic(format!("JOB EXIT CODE: {code}")),
        }

        Ok(())
    }
}

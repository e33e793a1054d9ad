//! Test doubles for driving the orchestrator end to end.
//!
//! The remote node is a set of temporary directories served by a real
//! [`LocalSession`] (wrapped to record every script it runs). The scheduler is
//! a scripted double that replays a sequence of statuses and progress line
//! counts and writes the files a real scheduler would write.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
use lsfrun_engine::CleanupCoordinator;
use lsfrun_engine::CommunicationChannel;
use lsfrun_engine::ExecOutcome;
use lsfrun_engine::FileStagingManager;
use lsfrun_engine::JobEvent;
use lsfrun_engine::JobIdentity;
use lsfrun_engine::JobLog;
use lsfrun_engine::JobOrchestrator;
use lsfrun_engine::JobStatus;
use lsfrun_engine::LocalSession;
use lsfrun_engine::RemoteJobHandle;
use lsfrun_engine::RemoteLocation;
use lsfrun_engine::RemoteSession;
use lsfrun_engine::SchedulerAdapter;
use lsfrun_engine::StatusClass;
use lsfrun_engine::SubmissionError;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// A local session that records the scripts it executes.
#[derive(Debug)]
pub struct RecordingSession {
    /// The session doing the actual work.
    inner: LocalSession,
    /// The scripts executed so far.
    scripts: Mutex<Vec<String>>,
}

impl RecordingSession {
    /// Gets the scripts executed so far.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// Counts the executed scripts starting with the given prefix.
    pub fn count(&self, prefix: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl RemoteSession for RecordingSession {
    async fn execute(&self, script: &str) -> Result<ExecOutcome> {
        self.scripts.lock().unwrap().push(script.to_string());
        self.inner.execute(script).await
    }

    async fn push(&self, local: &Path, location: RemoteLocation, name: &str) -> Result<()> {
        self.inner.push(local, location, name).await
    }

    async fn pull(&self, remote: &str, local_dir: &Path) -> Result<PathBuf> {
        self.inner.pull(remote, local_dir).await
    }

    fn execution_directory(&self) -> &str {
        self.inner.execution_directory()
    }
}

/// The directories of a simulated controller and remote node.
pub struct Fixture {
    /// The root of all directories.
    pub root: TempDir,
    /// The remote working directory.
    pub work: PathBuf,
    /// The remote execution directory.
    pub exec: PathBuf,
    /// The controller's shared script area.
    pub scripts: PathBuf,
    /// The run's own storage directory.
    pub run: PathBuf,
    /// The session to the simulated remote node.
    pub session: Arc<RecordingSession>,
}

impl Fixture {
    /// Creates a new fixture.
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("work");
        let exec = root.path().join("exec");
        let scripts = root.path().join("scripts");
        let run = root.path().join("run");
        for dir in [&work, &exec, &scripts, &run] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let session = Arc::new(RecordingSession {
            inner: LocalSession::new(&work, &exec),
            scripts: Mutex::default(),
        });

        Self {
            root,
            work,
            exec,
            scripts,
            run,
            session,
        }
    }

    /// Creates a scheduler double for this fixture.
    pub fn scheduler(&self) -> ScriptedScheduler {
        ScriptedScheduler {
            work: self.work.clone(),
            exec: self.exec.clone(),
            statuses: Mutex::default(),
            line_counts: Mutex::default(),
            last_line_count: Mutex::new(Some(0)),
            total_lines: 0,
            submit_exit_code: 0,
            run_script: false,
            cancel_on_running: None,
            panic_on_status: false,
            calls: Mutex::default(),
            submitted_script: Mutex::default(),
        }
    }

    /// Creates an orchestrator over this fixture and the given scheduler.
    pub fn orchestrator(
        &self,
        scheduler: Arc<ScriptedScheduler>,
    ) -> (JobOrchestrator, UnboundedReceiver<JobEvent>) {
        let session: Arc<dyn RemoteSession> = self.session.clone();
        let channel = CommunicationChannel::new(session.clone(), &self.run);
        let staging = FileStagingManager::new(session.clone(), &self.scripts);
        let cleanup = CleanupCoordinator::new(session, &self.scripts);
        let (log, rx) = JobLog::new();

        (
            JobOrchestrator::new(scheduler, channel, staging, cleanup).with_log(log),
            rx,
        )
    }

    /// Counts how many times the remote working directory was wiped.
    pub fn cleanups(&self) -> usize {
        self.session.count("rm -f -- ")
    }

    /// Lists the entries of a directory.
    pub fn list(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Drains the events received so far.
pub fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    events
}

/// Renders lines `from + 1 ..= to` of the simulated job output.
pub fn lines(from: u64, to: u64) -> String {
    (from + 1..=to).map(|i| format!("line {i}\n")).collect()
}

/// A scheduler double that replays scripted statuses and output.
#[derive(Debug)]
pub struct ScriptedScheduler {
    /// The remote working directory.
    work: PathBuf,
    /// The remote execution directory.
    exec: PathBuf,
    /// The statuses to report, in order; `DONE` once exhausted.
    statuses: Mutex<VecDeque<&'static str>>,
    /// The progress line counts to materialize, in order.
    ///
    /// `None` leaves no progress file behind, as if the job had not produced
    /// one yet.
    line_counts: Mutex<VecDeque<Option<u64>>>,
    /// The line count materialized last.
    last_line_count: Mutex<Option<u64>>,
    /// The total number of lines the job outputs.
    pub total_lines: u64,
    /// The exit code of the submission.
    pub submit_exit_code: i32,
    /// Whether submission runs the staged script in the execution directory.
    pub run_script: bool,
    /// A token to cancel the first time a running status is reported.
    pub cancel_on_running: Option<CancellationToken>,
    /// Whether querying the status panics.
    pub panic_on_status: bool,
    /// The calls made to the scheduler.
    calls: Mutex<Vec<String>>,
    /// The staged script as it was at submission.
    submitted_script: Mutex<Option<String>>,
}

impl ScriptedScheduler {
    /// Sets the statuses to report.
    pub fn statuses(self, statuses: impl IntoIterator<Item = &'static str>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into_iter().collect();
        self
    }

    /// Sets the progress line counts to materialize.
    pub fn line_counts(self, counts: impl IntoIterator<Item = Option<u64>>) -> Self {
        *self.line_counts.lock().unwrap() = counts.into_iter().collect();
        self
    }

    /// Gets the calls made to the scheduler.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Counts the calls made with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(name))
            .count()
    }

    /// Gets the staged script as it was at submission.
    pub fn submitted_script(&self) -> Option<String> {
        self.submitted_script.lock().unwrap().clone()
    }

    /// Records a call.
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SchedulerAdapter for ScriptedScheduler {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit_job(
        &self,
        identity: &JobIdentity,
        _notify_on_completion: bool,
        queue_class: Option<&str>,
    ) -> Result<RemoteJobHandle, SubmissionError> {
        self.record(format!("submit {}", queue_class.unwrap_or("-")));

        let script = self.exec.join(identity.as_str());
        *self.submitted_script.lock().unwrap() = std::fs::read_to_string(&script).ok();

        if self.submit_exit_code != 0 {
            return Err(SubmissionError::Rejected {
                exit_code: self.submit_exit_code,
                output: "Bad queue name. Job not submitted.".to_string(),
            });
        }

        if self.run_script {
            let status = tokio::process::Command::new("bash")
                .arg(identity.as_str())
                .current_dir(&self.exec)
                .status()
                .await
                .map_err(|e| SubmissionError::Remote(e.into()))?;
            assert!(status.success(), "job script failed");
        }

        Ok(RemoteJobHandle::new("42", identity.clone()))
    }

    async fn get_job_status(&self, _handle: &RemoteJobHandle) -> Result<JobStatus> {
        if self.panic_on_status {
            panic!("scheduler exploded");
        }

        let status = self.statuses.lock().unwrap().pop_front().unwrap_or("DONE");
        self.record(format!("status {status}"));

        if status == "RUN"
            && let Some(token) = &self.cancel_on_running
        {
            token.cancel();
        }

        Ok(JobStatus::new(status))
    }

    fn classify(&self, status: &JobStatus) -> StatusClass {
        match status.as_str() {
            "PEND" => StatusClass::Pending,
            "RUN" => StatusClass::Running,
            "DONE" => StatusClass::Succeeded,
            "EXIT" | "ABORTED" => StatusClass::Failed,
            _ => StatusClass::Unknown,
        }
    }

    async fn create_job_progress_file(
        &self,
        _handle: &RemoteJobHandle,
        target: &str,
    ) -> Result<()> {
        let count = {
            let mut last = self.last_line_count.lock().unwrap();
            if let Some(next) = self.line_counts.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        };
        self.record(format!("progress {count:?}"));

        let path = self.work.join(target);
        match count {
            Some(count) => std::fs::write(path, lines(0, count))?,
            None => {
                let _ = std::fs::remove_file(path);
            }
        }

        Ok(())
    }

    async fn create_formatted_running_job_output_file(
        &self,
        source: &str,
        from: u64,
        to: u64,
    ) -> Result<()> {
        if !self.work.join(source).is_file() {
            bail!("progress file `{source}` does not exist");
        }

        self.record(format!("range {from} {to}"));
        std::fs::write(self.work.join("output"), lines(from, to))?;
        Ok(())
    }

    async fn create_finished_job_output_file(
        &self,
        _handle: &RemoteJobHandle,
        from: u64,
    ) -> Result<()> {
        self.record(format!("finished {from}"));
        std::fs::write(self.work.join("output"), lines(from, self.total_lines))?;
        Ok(())
    }

    async fn kill_job(&self, _handle: &RemoteJobHandle) -> Result<()> {
        self.record("kill".to_string());
        Ok(())
    }

    async fn print_error_log(&self, _handle: &RemoteJobHandle, log: &JobLog) -> Result<()> {
        self.record("error_log".to_string());
        log.diagnostic("JOB ERROR LOG:\nsomething went wrong\n");
        Ok(())
    }

    async fn print_exit_code(&self, _handle: &RemoteJobHandle, log: &JobLog) -> Result<()> {
        self.record("exit_code".to_string());
        log.diagnostic("JOB EXIT CODE: 1");
        Ok(())
    }
}

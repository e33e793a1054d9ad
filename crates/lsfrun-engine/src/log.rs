//! The job log: the caller-facing channel for job status and output.
//!
//! Diagnostics about the engine itself go through `tracing`; everything the
//! user of a run is meant to read (status lines, streamed job output,
//! scheduler error logs) is sent as a [`JobEvent`] on the job log.

use tokio::sync::mpsc;

/// Represents an event written to the job log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The scheduler-reported status of the job after a poll.
    Status(String),
    /// A human-readable explanation of the current status.
    StatusDetail(String),
    /// A chunk of output streamed from the running job.
    Progress(String),
    /// The remaining output of the job once it reached a terminal status.
    FinalOutput(String),
    /// Diagnostic output from the scheduler for a failed job.
    Diagnostic(String),
    /// An informational message.
    Message(String),
    /// An error that ended the run.
    Error(String),
}

/// A handle for writing [`JobEvent`]s to the caller.
///
/// Job events must not be dropped, so the log is backed by an unbounded
/// channel rather than a broadcast channel.
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    /// The sender for job events.
    ///
    /// This is `None` when the job log is disabled.
    sender: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl JobLog {
    /// Constructs a new job log along with the receiver of its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// Constructs a job log that discards every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Writes an event to the job log.
    pub fn emit(&self, event: JobEvent) {
        if let Some(sender) = &self.sender {
            // The receiver going away only means nobody is reading anymore
            let _ = sender.send(event);
        }
    }

    /// Writes a status event.
    pub fn status(&self, status: impl Into<String>) {
        self.emit(JobEvent::Status(status.into()));
    }

    /// Writes an informational message.
    pub fn message(&self, message: impl Into<String>) {
        self.emit(JobEvent::Message(message.into()));
    }

    /// Writes a diagnostic message.
    pub fn diagnostic(&self, diagnostic: impl Into<String>) {
        self.emit(JobEvent::Diagnostic(diagnostic.into()));
    }

    /// Writes an error message.
    pub fn error(&self, error: impl Into<String>) {
        self.emit(JobEvent::Error(error.into()));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disabled_log_discards() {
        JobLog::disabled().message("nobody is listening");
    }

    #[test]
    fn events_arrive_in_order() {
        let (log, mut rx) = JobLog::new();
        log.status("PEND");
        log.emit(JobEvent::Progress("line".into()));
        drop(log);

        assert_eq!(rx.try_recv().unwrap(), JobEvent::Status("PEND".into()));
        assert_eq!(rx.try_recv().unwrap(), JobEvent::Progress("line".into()));
        assert!(rx.try_recv().is_err());
    }
}

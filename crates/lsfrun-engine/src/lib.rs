//! Orchestration engine for running batch jobs on external workload managers.
//!
//! A job is staged onto a remote execution node, submitted to the node's
//! batch scheduler, and then polled until the scheduler reports a terminal
//! status. While the job runs, its growing output is streamed back to the
//! caller's [`JobLog`]. Temporary files on both the remote node and the
//! controller are removed on every exit path.
//!
//! The engine is organized around two capability traits:
//!
//! * [`SchedulerAdapter`] abstracts a single batch scheduler family (see
//!   [`LsfScheduler`]).
//! * [`RemoteSession`] abstracts shell execution on, and file copies to and
//!   from, the remote node (see [`SshSession`] and [`LocalSession`]).
//!
//! [`JobOrchestrator`] drives both through a single job lifecycle.

pub mod cleanup;
pub mod config;
pub mod job;
pub mod log;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod staging;

pub use cleanup::CleanupCoordinator;
pub use config::CloudConfig;
pub use config::SchedulerKind;
pub use config::SessionConfig;
pub use job::JobIdentity;
pub use job::JobSpec;
pub use log::JobEvent;
pub use log::JobLog;
pub use orchestrator::JobOrchestrator;
pub use orchestrator::JobOutcome;
pub use orchestrator::JobState;
pub use orchestrator::OrchestrationError;
pub use orchestrator::OrchestrationResult;
pub use orchestrator::Outcome;
pub use progress::ProgressTracker;
pub use scheduler::JobStatus;
pub use scheduler::RemoteJobHandle;
pub use scheduler::SchedulerAdapter;
pub use scheduler::StatusClass;
pub use scheduler::SubmissionError;
pub use scheduler::lsf::LsfScheduler;
pub use session::CommunicationChannel;
pub use session::ExecOutcome;
pub use session::RemoteLocation;
pub use session::RemoteSession;
pub use session::local::LocalSession;
pub use session::ssh::SshSession;
pub use staging::FileStagingManager;
pub use staging::ShellPreamble;
pub use staging::StagingError;
pub use staging::StagingManifest;

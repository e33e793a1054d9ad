//! Remote sessions: shell execution on, and file copies to and from, the
//! remote execution node.
//!
//! The controller and the execution node are different machines. Every
//! session therefore exposes two remote directories:
//!
//! * the *working directory*, where shell commands run and where files are
//!   exchanged with the controller, and
//! * the *execution directory*, where job scripts are staged and submitted
//!   from.
//!
//! Results of single-shot commands travel back to the controller through the
//! [`CommunicationChannel`].

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;

pub mod local;
pub mod ssh;

/// The name of the file used to shuttle single-shot command output from the
/// remote node to the controller.
pub const COMMUNICATION_FILE: &str = "output";

/// The name of the file the scheduler materializes running job output into.
pub const PROGRESS_FILE: &str = "jobProgress";

/// Identifies one of the remote directories of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLocation {
    /// The remote working directory.
    WorkingDirectory,
    /// The remote execution directory.
    ExecutionDirectory,
}

/// The result of executing a shell script on the remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// The exit code of the script.
    pub exit_code: i32,
}

impl ExecOutcome {
    /// Determines if the script exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Represents a session with a remote execution node.
#[async_trait]
pub trait RemoteSession: fmt::Debug + Send + Sync {
    /// Runs a `bash` script in the remote working directory.
    ///
    /// A nonzero exit of the script is reported through the returned
    /// [`ExecOutcome`]; an error means the script could not be run at all.
    async fn execute(&self, script: &str) -> Result<ExecOutcome>;

    /// Copies a controller-local file into a remote directory under the given
    /// name.
    async fn push(&self, local: &Path, location: RemoteLocation, name: &str) -> Result<()>;

    /// Copies a remote file into a controller-local directory, keeping its
    /// file name.
    ///
    /// Relative remote paths are relative to the remote working directory.
    ///
    /// Returns the controller-local path of the copy.
    async fn pull(&self, remote: &str, local_dir: &Path) -> Result<PathBuf>;

    /// Gets the remote execution directory.
    ///
    /// The directory may start with `~`, meaning the remote user's home.
    fn execution_directory(&self) -> &str;
}

/// Quotes a string for use as a single `bash` word.
pub fn quote(s: &str) -> String {
    // `shlex` only refuses strings containing nul bytes
    let s = s.replace('\0', "");
    shlex::try_quote(&s)
        .map(Cow::into_owned)
        .unwrap_or_default()
}

/// Quotes a remote path for `bash`, leaving a leading `~` unquoted so that it
/// still expands to the remote user's home directory.
pub fn quote_remote_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }

    match path.strip_prefix("~/") {
        Some(rest) => format!("~/{rest}", rest = quote(rest)),
        None => quote(path),
    }
}

/// The output of a command captured through the [`CommunicationChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// The exit code of the command.
    pub exit_code: i32,
    /// The standard output of the command.
    pub output: String,
}

/// The channel that shuttles single-shot command output back to the
/// controller.
///
/// Output is redirected to the well-known [`COMMUNICATION_FILE`] in the
/// remote working directory (overwriting it) and then pulled into the run's
/// directory on the controller.
#[derive(Debug, Clone)]
pub struct CommunicationChannel {
    /// The session to the remote node.
    session: Arc<dyn RemoteSession>,
    /// The controller-local directory the communication file is pulled into.
    local_dir: PathBuf,
}

impl CommunicationChannel {
    /// Creates a new communication channel that pulls into `local_dir`.
    pub fn new(session: Arc<dyn RemoteSession>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            local_dir: local_dir.into(),
        }
    }

    /// Gets the session the channel communicates over.
    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.session
    }

    /// Gets the controller-local directory the communication file is pulled
    /// into.
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Runs a command on the remote node with its standard output redirected
    /// into the communication file.
    pub async fn write(&self, command: &str) -> Result<ExecOutcome> {
        trace!(command, "writing to the communication file");
        self.session
            .execute(&format!("{{ {command}\n}} > {COMMUNICATION_FILE}"))
            .await
    }

    /// Retrieves the current contents of the communication file.
    pub async fn retrieve(&self) -> Result<String> {
        let path = self
            .session
            .pull(COMMUNICATION_FILE, &self.local_dir)
            .await
            .context("failed to retrieve the communication file")?;

        tokio::fs::read_to_string(&path).await.with_context(|| {
            format!(
                "failed to read communication file `{path}`",
                path = path.display()
            )
        })
    }

    /// Runs a command on the remote node and retrieves its standard output.
    pub async fn capture(&self, command: &str) -> Result<Captured> {
        let outcome = self.write(command).await?;
        let output = self.retrieve().await?;
        Ok(Captured {
            exit_code: outcome.exit_code,
            output,
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::LocalSession;

    #[test]
    fn quoting() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("with space"), "'with space'");
        assert_eq!(quote_remote_path("~"), "~");
        assert_eq!(quote_remote_path("~/a b"), "~/'a b'");
        assert_eq!(quote_remote_path("/scratch/x"), "/scratch/x");
    }

    #[tokio::test]
    async fn capture_round_trips_output() {
        let remote = tempdir().unwrap();
        let local = tempdir().unwrap();
        let session: Arc<dyn RemoteSession> =
            Arc::new(LocalSession::new(remote.path(), remote.path()));
        let channel = CommunicationChannel::new(session, local.path());

        let captured = channel.capture("echo hello; echo world").await.unwrap();
        assert_eq!(captured.exit_code, 0);
        assert_eq!(captured.output, "hello\nworld\n");

        // A failing command still truncates the communication file
        let captured = channel.capture("cat does-not-exist").await.unwrap();
        assert_ne!(captured.exit_code, 0);
        assert_eq!(captured.output, "");
    }
}

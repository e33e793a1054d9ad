//! A session with a remote execution node reached over SSH.
//!
//! Commands and copies go through the system `ssh` and `scp` binaries so that
//! the user's existing SSH configuration (keys, agents, jump hosts) applies
//! unchanged.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use tracing::trace;

use super::ExecOutcome;
use super::RemoteLocation;
use super::RemoteSession;
use super::quote;
use super::quote_remote_path;

/// The exit code `ssh` reports for its own failures.
///
/// A remote command may exit with the same code, so it only marks a
/// transport failure when the wrapper never reported the command's status.
const SSH_ERROR_EXIT_CODE: i32 = 255;

/// The prefix of the line the remote wrapper prints with the exit code of the
/// command it ran.
const EXIT_MARKER: &str = "__lsfrun_exit=";

/// A [`RemoteSession`] backed by the system `ssh` and `scp` commands.
#[derive(Debug, Clone)]
pub struct SshSession {
    /// The remote host.
    host: String,
    /// The remote user; `None` uses the SSH configuration's default.
    user: Option<String>,
    /// The remote port; `None` uses the SSH configuration's default.
    port: Option<u16>,
    /// The remote working directory.
    workspace: String,
    /// The remote execution directory.
    execution_directory: String,
    /// The `ssh` program to run.
    ssh_program: PathBuf,
    /// The `scp` program to run.
    scp_program: PathBuf,
}

impl SshSession {
    /// Creates a new SSH session.
    pub fn new(
        host: impl Into<String>,
        workspace: impl Into<String>,
        execution_directory: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            workspace: workspace.into(),
            execution_directory: execution_directory.into(),
            ssh_program: "ssh".into(),
            scp_program: "scp".into(),
        }
    }

    /// Sets the remote user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the remote port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Gets the `[user@]host` destination.
    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}", host = self.host),
            None => self.host.clone(),
        }
    }

    /// Gets the `scp` spelling of a remote file in the given directory.
    ///
    /// `scp` resolves relative remote paths against the user's home
    /// directory, so a leading `~/` is simply dropped.
    fn scp_path(&self, directory: &str, name: &str) -> String {
        let path = match directory.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                match rest.trim_matches('/') {
                    "" => name.to_string(),
                    rest => format!("{rest}/{name}"),
                }
            }
            _ => format!("{directory}/{name}", directory = directory.trim_end_matches('/')),
        };

        format!("{destination}:{path}", destination = self.destination())
    }

    /// Wraps a script for `bash -s` on the remote host.
    ///
    /// The script runs in the working directory with its stdin detached from
    /// the wrapper, and its exit code is printed on a marker line.
    fn wrap(&self, script: &str) -> String {
        let workspace = quote_remote_path(&self.workspace);
        format!(
            "mkdir -p {workspace} && cd {workspace} || {{ echo {EXIT_MARKER}1; exit 1; }}\n\
             bash -c {script} < /dev/null\n\
             echo {EXIT_MARKER}$?\n",
            script = quote(script)
        )
    }

    /// Builds an `ssh` command to the remote host.
    fn ssh(&self) -> Command {
        let mut command = Command::new(&self.ssh_program);
        command.arg("-o").arg("BatchMode=yes");
        if let Some(port) = self.port {
            command.arg("-p").arg(port.to_string());
        }

        command.arg(self.destination()).kill_on_drop(true);
        command
    }

    /// Runs `scp` from `source` to `target`.
    async fn scp(&self, source: &str, target: &str) -> Result<()> {
        let mut command = Command::new(&self.scp_program);
        // Quiet and batch mode; never prompt for a password
        command.arg("-q").arg("-B");
        if let Some(port) = self.port {
            command.arg("-P").arg(port.to_string());
        }

        let output = command
            .arg(source)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to spawn `scp`")?;

        if !output.status.success() {
            bail!(
                "failed to copy `{source}` to `{target}`: {stderr}",
                stderr = String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

/// Gets the exit code reported after the last marker in the remote output.
fn reported_exit_code(stdout: &str) -> Option<i32> {
    let (_, code) = stdout.rsplit_once(EXIT_MARKER)?;
    code.trim().parse().ok()
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&self, script: &str) -> Result<ExecOutcome> {
        let mut child = self
            .ssh()
            .arg("bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn `ssh`")?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ssh child stdin missing"))?;
        stdin
            .write_all(self.wrap(script).as_bytes())
            .await
            .context("failed to send script to `ssh`")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for `ssh`")?;

        trace!(
            host = %self.host,
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "remote command finished"
        );

        let exit_code = output
            .status
            .code()
            .ok_or_else(|| anyhow!("`ssh` was terminated by a signal"))?;
        match reported_exit_code(&String::from_utf8_lossy(&output.stdout)) {
            Some(exit_code) => Ok(ExecOutcome { exit_code }),
            None if exit_code == SSH_ERROR_EXIT_CODE => bail!(
                "failed to run a command on `{host}`: {stderr}",
                host = self.host,
                stderr = String::from_utf8_lossy(&output.stderr).trim()
            ),
            None => Ok(ExecOutcome { exit_code }),
        }
    }

    async fn push(&self, local: &Path, location: RemoteLocation, name: &str) -> Result<()> {
        let directory = match location {
            RemoteLocation::WorkingDirectory => &self.workspace,
            RemoteLocation::ExecutionDirectory => &self.execution_directory,
        };

        let target = self.scp_path(directory, name);
        debug!(local = %local.display(), target, "pushing file");
        self.scp(&local.to_string_lossy(), &target).await
    }

    async fn pull(&self, remote: &str, local_dir: &Path) -> Result<PathBuf> {
        let name = Path::new(remote)
            .file_name()
            .ok_or_else(|| anyhow!("remote path `{remote}` has no file name"))?;

        let source = if remote.starts_with('/') || remote.starts_with('~') {
            let (directory, file) = remote
                .rsplit_once('/')
                .map(|(d, f)| (if d.is_empty() { "/" } else { d }, f))
                .unwrap_or(("~", remote));
            self.scp_path(directory, file)
        } else {
            self.scp_path(&self.workspace, remote)
        };

        tokio::fs::create_dir_all(local_dir).await.with_context(|| {
            format!(
                "failed to create directory `{path}`",
                path = local_dir.display()
            )
        })?;

        let target = local_dir.join(name);
        self.scp(&source, &target.to_string_lossy()).await?;
        Ok(target)
    }

    fn execution_directory(&self) -> &str {
        &self.execution_directory
    }
}

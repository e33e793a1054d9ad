//! A session that treats the controller itself as the execution node.
//!
//! This matches clusters where the controller is an LSF submission host: the
//! "remote" working and execution directories are ordinary local directories
//! and commands run through a local `bash`.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::trace;

use super::ExecOutcome;
use super::RemoteLocation;
use super::RemoteSession;

/// A [`RemoteSession`] running on the local host.
#[derive(Debug, Clone)]
pub struct LocalSession {
    /// The working directory commands run in.
    working_directory: PathBuf,
    /// The execution directory job scripts are staged into.
    execution_directory: String,
}

impl LocalSession {
    /// Creates a new local session.
    ///
    /// A leading `~` in either directory is expanded to the current user's
    /// home directory. Both directories are created on first use.
    pub fn new(working_directory: impl AsRef<Path>, execution_directory: impl AsRef<Path>) -> Self {
        let expand = |p: &Path| -> PathBuf {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        };

        Self {
            working_directory: expand(working_directory.as_ref()),
            execution_directory: expand(execution_directory.as_ref())
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// Gets the local directory backing a remote location.
    fn directory(&self, location: RemoteLocation) -> &Path {
        match location {
            RemoteLocation::WorkingDirectory => &self.working_directory,
            RemoteLocation::ExecutionDirectory => Path::new(&self.execution_directory),
        }
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn execute(&self, script: &str) -> Result<ExecOutcome> {
        fs::create_dir_all(&self.working_directory)
            .await
            .with_context(|| {
                format!(
                    "failed to create working directory `{path}`",
                    path = self.working_directory.display()
                )
            })?;

        let output = Command::new("bash")
            .arg("-c")
            .arg(script)
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to spawn `bash`")?;

        trace!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "local command finished"
        );

        let exit_code = output
            .status
            .code()
            .ok_or_else(|| anyhow!("local command was terminated by a signal"))?;
        Ok(ExecOutcome { exit_code })
    }

    async fn push(&self, local: &Path, location: RemoteLocation, name: &str) -> Result<()> {
        let dir = self.directory(location);
        fs::create_dir_all(dir).await.with_context(|| {
            format!("failed to create directory `{path}`", path = dir.display())
        })?;

        let target = dir.join(name);
        fs::copy(local, &target).await.with_context(|| {
            format!(
                "failed to copy `{local}` to `{target}`",
                local = local.display(),
                target = target.display()
            )
        })?;
        Ok(())
    }

    async fn pull(&self, remote: &str, local_dir: &Path) -> Result<PathBuf> {
        let source = self.working_directory.join(remote);
        let name = source
            .file_name()
            .ok_or_else(|| anyhow!("remote path `{remote}` has no file name"))?;

        fs::create_dir_all(local_dir).await.with_context(|| {
            format!(
                "failed to create directory `{path}`",
                path = local_dir.display()
            )
        })?;

        let target = local_dir.join(name);
        fs::copy(&source, &target).await.with_context(|| {
            format!(
                "failed to copy `{source}` to `{target}`",
                source = source.display(),
                target = target.display()
            )
        })?;
        Ok(target)
    }

    fn execution_directory(&self) -> &str {
        &self.execution_directory
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn executes_in_working_directory() {
        let root = tempdir().unwrap();
        let work = root.path().join("work");
        let session = LocalSession::new(&work, root.path().join("exec"));

        let outcome = session.execute("pwd > here; exit 3").await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());

        let here = std::fs::read_to_string(work.join("here")).unwrap();
        assert_eq!(
            Path::new(here.trim()).canonicalize().unwrap(),
            work.canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn push_and_pull() {
        let root = tempdir().unwrap();
        let session = LocalSession::new(root.path().join("work"), root.path().join("exec"));

        let source = root.path().join("input.txt");
        std::fs::write(&source, "data").unwrap();

        session
            .push(&source, RemoteLocation::ExecutionDirectory, "staged.txt")
            .await
            .unwrap();
        assert!(root.path().join("exec").join("staged.txt").is_file());

        session
            .push(&source, RemoteLocation::WorkingDirectory, "input.txt")
            .await
            .unwrap();
        let pulled = session
            .pull("input.txt", &root.path().join("back"))
            .await
            .unwrap();
        assert_eq!(pulled, root.path().join("back").join("input.txt"));
        assert_eq!(std::fs::read_to_string(pulled).unwrap(), "data");

        assert!(session.pull("missing.txt", root.path()).await.is_err());
    }
}

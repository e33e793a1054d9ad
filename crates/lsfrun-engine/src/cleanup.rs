//! Teardown of the temporary files of a run.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::JobIdentity;
use crate::session::RemoteSession;
use crate::session::quote;
use crate::session::quote_remote_path;

/// Removes the temporary files of a run from the remote node and from the
/// controller's shared script area.
///
/// Cleanup never fails: every step is attempted, and a failed step is only
/// reported as a warning. Every step is idempotent, so running cleanup again
/// for the same run is harmless.
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    /// The session to the remote node.
    session: Arc<dyn RemoteSession>,
    /// The controller's shared script area.
    scripts_dir: PathBuf,
}

impl CleanupCoordinator {
    /// Constructs a new cleanup coordinator.
    pub fn new(session: Arc<dyn RemoteSession>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Cleans up after a run.
    ///
    /// * The contents of the remote working directory are removed (skipped
    ///   when the working directory was never resolved).
    /// * The staged job script and the scheduler files named after it are
    ///   removed from the remote execution directory.
    /// * The job script and the per-run input copies are removed from the
    ///   shared script area.
    pub async fn cleanup(
        &self,
        working_directory: Option<&str>,
        identity: &JobIdentity,
        per_run_names: &[String],
    ) {
        debug!(job = %identity, "cleaning up");

        match working_directory.map(|wd| wd.trim().trim_end_matches('/')) {
            Some(wd) if !wd.is_empty() => {
                self.remote(&format!("rm -rf -- {wd}/*", wd = quote_remote_path(wd)))
                    .await;
            }
            _ => debug!("remote working directory was never resolved"),
        }

        let directory = quote_remote_path(self.session.execution_directory());
        self.remote(&format!(
            "rm -f -- {directory}/{id} {directory}/{id}.*",
            id = quote(identity.as_str())
        ))
        .await;

        remove_local(&self.scripts_dir.join(identity.as_str())).await;
        for name in per_run_names {
            remove_local(&self.scripts_dir.join(name)).await;
        }
    }

    /// Runs a cleanup command on the remote node.
    async fn remote(&self, command: &str) {
        match self.session.execute(command).await {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => warn!(
                command,
                exit_code = outcome.exit_code,
                "remote cleanup command failed"
            ),
            Err(e) => warn!(command, "failed to run remote cleanup command: {e:#}"),
        }
    }
}

/// Removes a file from the controller; an absent file is not a failure.
async fn remove_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "failed to remove `{path}` during cleanup: {e}",
            path = path.display()
        ),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::LocalSession;

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let root = tempdir().unwrap();
        let work = root.path().join("work");
        let exec = root.path().join("exec");
        let scripts = root.path().join("scripts");
        for dir in [&work, &exec, &scripts] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let identity = JobIdentity::generate();
        std::fs::write(work.join("output"), "").unwrap();
        std::fs::write(work.join("input.txt"), "").unwrap();
        std::fs::write(exec.join(identity.as_str()), "").unwrap();
        std::fs::write(exec.join(identity.with_extension("out")), "").unwrap();
        std::fs::write(exec.join("unrelated.txt"), "").unwrap();
        std::fs::write(scripts.join(identity.as_str()), "").unwrap();
        std::fs::write(scripts.join("input.txt"), "").unwrap();
        std::fs::write(scripts.join("kept.txt"), "").unwrap();

        let session = Arc::new(LocalSession::new(&work, &exec));
        let cleanup = CleanupCoordinator::new(session, &scripts);
        let wd = work.to_string_lossy().into_owned();
        let names = ["input.txt".to_string()];

        let list = |dir: &Path| {
            let mut names: Vec<_> = std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        };

        cleanup.cleanup(Some(&wd), &identity, &names).await;
        let state = (list(&work), list(&exec), list(&scripts));
        assert!(state.0.is_empty());
        assert_eq!(state.1, ["unrelated.txt"]);
        assert_eq!(state.2, ["kept.txt"]);

        cleanup.cleanup(Some(&wd), &identity, &names).await;
        assert_eq!((list(&work), list(&exec), list(&scripts)), state);
    }

    #[tokio::test]
    async fn unresolved_working_directory_is_left_alone() {
        let root = tempdir().unwrap();
        let session = Arc::new(LocalSession::new(root.path(), root.path().join("exec")));
        std::fs::write(root.path().join("keep.txt"), "").unwrap();

        let cleanup = CleanupCoordinator::new(session, root.path().join("scripts"));
        cleanup.cleanup(None, &JobIdentity::generate(), &[]).await;
        cleanup.cleanup(Some(" "), &JobIdentity::generate(), &[]).await;
        assert!(root.path().join("keep.txt").is_file());
    }
}

//! Two-hop file staging between the controller and the remote node.
//!
//! The remote node cannot see the controller's filesystem, so files travel
//! in two hops:
//!
//! 1. controller path → shared script area on the controller → remote working
//!    directory (performed by [`FileStagingManager::send_inputs`]);
//! 2. remote working directory → remote execution directory (performed by the
//!    job itself, through the [`ShellPreamble`] rendered at the top of the job
//!    script).
//!
//! Requested outputs travel the other way: the job script copies them back
//! into the remote working directory and
//! [`FileStagingManager::retrieve_outputs`] pulls them to the controller.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::debug;

use crate::JobIdentity;
use crate::JobLog;
use crate::JobSpec;
use crate::session::RemoteLocation;
use crate::session::RemoteSession;
use crate::session::quote;
use crate::session::quote_remote_path;

/// The interpreter line every job script starts with.
const SCRIPT_SHEBANG: &str = "#!/bin/bash";

/// The prefix of LSF directive lines in a job script.
const BSUB_DIRECTIVE: &str = "#BSUB";

/// An error from staging files to or from the remote node.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// A file to send does not exist.
    #[error("input file `{}` does not exist", .0.display())]
    MissingInput(PathBuf),
    /// A file to send cannot be staged under a usable name.
    #[error("input file `{}` cannot be staged: {reason}", .path.display())]
    InvalidInput {
        /// The path of the input file.
        path: PathBuf,
        /// The reason the file cannot be staged.
        reason: String,
    },
    /// A file could not be copied into the shared script area.
    #[error("failed to copy `{}` into the shared script area", .path.display())]
    Copy {
        /// The path of the file being copied.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A file could not be pushed to the remote node.
    #[error("failed to send `{name}` to the remote node")]
    Push {
        /// The remote name of the file.
        name: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },
    /// The job script could not be written.
    #[error("failed to write job script `{}`", .path.display())]
    Script {
        /// The path of the job script.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The staged job script could not be made executable.
    #[error("failed to make job script `{identity}` executable (exit code {exit_code})")]
    Permissions {
        /// The identity naming the job script.
        identity: String,
        /// The exit code of `chmod`.
        exit_code: i32,
    },
    /// The remote working directory could not be determined.
    #[error("failed to determine the remote working directory")]
    WorkingDirectory,
    /// A remote command failed to run.
    #[error("failed to run a staging command on the remote node")]
    Remote(#[source] anyhow::Error),
    /// The download destination could not be created.
    #[error("failed to create download destination `{}`", .path.display())]
    Destination {
        /// The path of the destination directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A requested output file could not be retrieved.
    #[error("failed to download `{name}`")]
    Retrieve {
        /// The requested remote file.
        name: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },
}

/// A file sent to the remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInput {
    /// The controller-local path of the file.
    pub source: PathBuf,
    /// The name of the file on the remote node.
    pub name: String,
}

impl StagedInput {
    /// Creates a staged input named after the file's base name.
    fn from_path(path: &Path) -> Result<Self, StagingError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StagingError::InvalidInput {
                path: path.to_path_buf(),
                reason: "the path does not name a file".to_string(),
            })?;

        Ok(Self {
            source: path.to_path_buf(),
            name: name.to_string(),
        })
    }
}

/// The set of files staged for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingManifest {
    /// The run's own input files.
    ///
    /// These are copied into the shared script area for the run and deleted
    /// from it by cleanup.
    pub inputs: Vec<StagedInput>,
    /// The previously-uploaded files sent along with every run.
    pub uploaded: Vec<StagedInput>,
}

impl StagingManifest {
    /// Gets the names of the per-run copies in the shared script area.
    pub fn per_run_names(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.name.clone()).collect()
    }

    /// Computes the preamble that copies every staged file from the remote
    /// working directory into the job's directory.
    pub fn preamble(&self, working_directory: &str) -> ShellPreamble {
        let directory = quote_remote_path(working_directory.trim_end_matches('/'));
        ShellPreamble(
            self.inputs
                .iter()
                .chain(&self.uploaded)
                .map(|i| format!("cp {directory}/{name} .", name = quote(&i.name)))
                .collect(),
        )
    }
}

/// The shell commands a job runs first to pull its staged files into its own
/// directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellPreamble(Vec<String>);

impl ShellPreamble {
    /// Gets the commands of the preamble.
    pub fn commands(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ShellPreamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for command in &self.0 {
            writeln!(f, "{command}")?;
        }

        Ok(())
    }
}

/// Renders a job script.
///
/// Leading interpreter and `#BSUB` directive lines of the body are hoisted
/// above the preamble so the scheduler still honours them. Each requested
/// download gets a command copying it back into the remote working directory.
pub fn render_job_script(
    preamble: &ShellPreamble,
    body: &str,
    downloads: &[String],
    working_directory: &str,
) -> String {
    let mut lines = body.lines().peekable();
    let mut script = format!("{SCRIPT_SHEBANG}\n");

    if lines.peek().is_some_and(|l| l.starts_with("#!")) {
        lines.next();
    }

    while let Some(line) = lines.next_if(|l| l.trim_start().starts_with(BSUB_DIRECTIVE)) {
        script.push_str(line);
        script.push('\n');
    }

    script.push_str(&preamble.to_string());
    for line in lines {
        script.push_str(line);
        script.push('\n');
    }

    let directory = quote_remote_path(working_directory.trim_end_matches('/'));
    for download in downloads {
        script.push_str(&format!(
            "cp {download} {directory}/ > /dev/null\n",
            download = quote(download)
        ));
    }

    script
}

/// Stages job inputs and the job script, and retrieves job outputs.
#[derive(Debug, Clone)]
pub struct FileStagingManager {
    /// The session to the remote node.
    session: Arc<dyn RemoteSession>,
    /// The controller's shared script area.
    scripts_dir: PathBuf,
    /// The previously-uploaded files sent along with every run.
    uploads: Vec<PathBuf>,
}

impl FileStagingManager {
    /// Constructs a new staging manager.
    pub fn new(session: Arc<dyn RemoteSession>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            scripts_dir: scripts_dir.into(),
            uploads: Vec::new(),
        }
    }

    /// Sets the previously-uploaded files sent along with every run.
    pub fn with_uploads(mut self, uploads: impl IntoIterator<Item = PathBuf>) -> Self {
        self.uploads = uploads.into_iter().collect();
        self
    }

    /// Computes the staging manifest for a job.
    ///
    /// Two files to send may not share a base name, since they would
    /// overwrite each other on the remote node.
    pub fn manifest(&self, spec: &JobSpec) -> Result<StagingManifest, StagingError> {
        let mut names = HashSet::new();
        let mut manifest = StagingManifest::default();

        for path in &spec.files_to_send {
            let input = StagedInput::from_path(path)?;
            if !names.insert(input.name.clone()) {
                return Err(StagingError::InvalidInput {
                    path: path.clone(),
                    reason: format!("another input is also named `{name}`", name = input.name),
                });
            }

            manifest.inputs.push(input);
        }

        for path in &self.uploads {
            let upload = StagedInput::from_path(path)?;
            // A run's own input shadows an upload of the same name
            if names.insert(upload.name.clone()) {
                manifest.uploaded.push(upload);
            }
        }

        Ok(manifest)
    }

    /// Sends the files of the manifest to the remote working directory.
    ///
    /// Returns the preamble that completes the second hop on the remote node.
    pub async fn send_inputs(
        &self,
        manifest: &StagingManifest,
        working_directory: &str,
    ) -> Result<ShellPreamble, StagingError> {
        for input in manifest.inputs.iter().chain(&manifest.uploaded) {
            if !input.source.is_file() {
                return Err(StagingError::MissingInput(input.source.clone()));
            }
        }

        if !manifest.inputs.is_empty() {
            fs::create_dir_all(&self.scripts_dir)
                .await
                .map_err(|source| StagingError::Copy {
                    path: self.scripts_dir.clone(),
                    source,
                })?;
        }

        for input in &manifest.inputs {
            let staged = self.scripts_dir.join(&input.name);
            debug!(source = %input.source.display(), staged = %staged.display(), "staging input");
            fs::copy(&input.source, &staged)
                .await
                .map_err(|source| StagingError::Copy {
                    path: input.source.clone(),
                    source,
                })?;
            self.push(&staged, RemoteLocation::WorkingDirectory, &input.name)
                .await?;
        }

        for upload in &manifest.uploaded {
            self.push(&upload.source, RemoteLocation::WorkingDirectory, &upload.name)
                .await?;
        }

        Ok(manifest.preamble(working_directory))
    }

    /// Writes the job script into the shared script area and stages it in the
    /// remote execution directory.
    ///
    /// Returns the path of the script in the shared script area.
    pub async fn write_job_script(
        &self,
        identity: &JobIdentity,
        preamble: &ShellPreamble,
        body: &str,
        downloads: &[String],
        working_directory: &str,
    ) -> Result<PathBuf, StagingError> {
        let path = self.scripts_dir.join(identity.as_str());
        let script = render_job_script(preamble, body, downloads, working_directory);

        let write = async {
            fs::create_dir_all(&self.scripts_dir).await?;
            fs::write(&path, script).await?;
            #[cfg(unix)]
            {
                use std::fs::Permissions;
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, Permissions::from_mode(0o755)).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        write.await.map_err(|source| StagingError::Script {
            path: path.clone(),
            source,
        })?;

        self.push(&path, RemoteLocation::ExecutionDirectory, identity.as_str())
            .await?;
        Ok(path)
    }

    /// Marks the staged job script executable on the remote node.
    pub async fn set_executable(&self, identity: &JobIdentity) -> Result<(), StagingError> {
        let outcome = self
            .session
            .execute(&format!(
                "chmod 755 {directory}/{id} > /dev/null",
                directory = quote_remote_path(self.session.execution_directory()),
                id = identity
            ))
            .await
            .map_err(StagingError::Remote)?;

        if !outcome.success() {
            return Err(StagingError::Permissions {
                identity: identity.to_string(),
                exit_code: outcome.exit_code,
            });
        }

        Ok(())
    }

    /// Downloads the requested output files once the job has finished.
    ///
    /// Files are placed in the job's download destination, or in `run_dir`
    /// when the job has none. Nothing happens when no downloads were
    /// requested.
    pub async fn retrieve_outputs(
        &self,
        spec: &JobSpec,
        run_dir: &Path,
        log: &JobLog,
    ) -> Result<(), StagingError> {
        if spec.files_to_download.is_empty() {
            return Ok(());
        }

        log.message("Downloading the selected files:");
        let destination = spec.download_destination.as_deref().unwrap_or(run_dir);
        fs::create_dir_all(destination)
            .await
            .map_err(|source| StagingError::Destination {
                path: destination.to_path_buf(),
                source,
            })?;

        for file in &spec.files_to_download {
            // The job copied the file into the working directory under its base name
            let name = Path::new(file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.clone());

            let local = self
                .session
                .pull(&name, destination)
                .await
                .map_err(|source| StagingError::Retrieve {
                    name: file.clone(),
                    source,
                })?;
            log.message(format!("  {file} -> {local}", local = local.display()));
        }

        Ok(())
    }

    /// Pushes a file to the remote node.
    async fn push(
        &self,
        local: &Path,
        location: RemoteLocation,
        name: &str,
    ) -> Result<(), StagingError> {
        self.session
            .push(local, location, name)
            .await
            .map_err(|source| StagingError::Push {
                name: name.to_string(),
                source,
            })
    }
}

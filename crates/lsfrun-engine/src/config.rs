//! Configuration of the clouds a job can run on.
//!
//! A cloud is a remote execution node with an LSF client installation. Runs
//! select a cloud by execution label; the selected cloud supplies the queue
//! class, the remote session, and the scheduler adapter.

use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;

use crate::CommunicationChannel;
use crate::LocalSession;
use crate::LsfScheduler;
use crate::RemoteSession;
use crate::SchedulerAdapter;
use crate::SshSession;

/// The default remote execution directory (the remote user's home).
const DEFAULT_EXECUTION_DIRECTORY: &str = "~";

/// The default working directory of a local session.
const DEFAULT_LOCAL_WORKSPACE: &str = "~/.local/share/lsfrun/workspace";

/// Gets the default remote execution directory.
fn default_execution_directory() -> String {
    DEFAULT_EXECUTION_DIRECTORY.to_string()
}

/// Gets the default working directory of a local session.
fn default_local_workspace() -> String {
    DEFAULT_LOCAL_WORKSPACE.to_string()
}

/// Represents the supported scheduler families.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// IBM Spectrum LSF.
    #[default]
    Lsf,
}

/// Represents the configuration of a cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct CloudConfig {
    /// The name of the cloud.
    pub name: String,
    /// The execution labels the cloud can provision.
    ///
    /// An empty list provisions every label.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// The queue class jobs are submitted to.
    ///
    /// When `None`, jobs go to the scheduler's default queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// The remote directory job scripts are staged and submitted from.
    #[serde(default = "default_execution_directory")]
    pub execution_directory: String,
    /// The scheduler running on the cloud.
    #[serde(default)]
    pub scheduler: SchedulerKind,
    /// How the controller reaches the cloud's execution node.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            labels: Vec::new(),
            queue: None,
            execution_directory: default_execution_directory(),
            scheduler: SchedulerKind::default(),
            session: SessionConfig::default(),
        }
    }
}

impl CloudConfig {
    /// Determines if the cloud can provision a run with the given label.
    ///
    /// A run without a label can run anywhere.
    pub fn can_provision(&self, label: Option<&str>) -> bool {
        match label {
            Some(label) => self.labels.is_empty() || self.labels.iter().any(|l| l == label),
            None => true,
        }
    }

    /// Validates the cloud configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("configuration value `clouds.name` cannot be empty");
        }

        if self.queue.as_deref().is_some_and(|q| q.trim().is_empty()) {
            bail!(
                "configuration value `clouds.queue` of cloud `{name}` cannot be empty",
                name = self.name
            );
        }

        if self.execution_directory.trim().is_empty() {
            bail!(
                "configuration value `clouds.execution_directory` of cloud `{name}` cannot be \
                 empty",
                name = self.name
            );
        }

        self.session.validate(&self.name)
    }

    /// Creates the remote session described by the configuration.
    pub fn create_session(&self) -> Arc<dyn RemoteSession> {
        match &self.session {
            SessionConfig::Ssh(config) => {
                let mut session = SshSession::new(
                    &config.host,
                    &config.workspace,
                    &self.execution_directory,
                );
                if let Some(user) = &config.user {
                    session = session.with_user(user);
                }

                if let Some(port) = config.port {
                    session = session.with_port(port);
                }

                Arc::new(session)
            }
            SessionConfig::Local(config) => Arc::new(LocalSession::new(
                &config.workspace,
                &self.execution_directory,
            )),
        }
    }

    /// Creates the scheduler adapter for the cloud.
    pub fn create_scheduler(&self, channel: CommunicationChannel) -> Arc<dyn SchedulerAdapter> {
        match self.scheduler {
            SchedulerKind::Lsf => Arc::new(LsfScheduler::new(channel)),
        }
    }
}

/// Finds the first cloud that can provision a run with the given label.
pub fn resolve_cloud<'a>(clouds: &'a [CloudConfig], label: Option<&str>) -> Option<&'a CloudConfig> {
    clouds.iter().find(|c| c.can_provision(label))
}

/// Resolves the queue class for a run with the given label.
///
/// Returns `None` when no cloud can provision the label or the matching cloud
/// has no queue class; the job is then submitted to the default queue.
pub fn resolve_queue_class(clouds: &[CloudConfig], label: Option<&str>) -> Option<String> {
    resolve_cloud(clouds, label).and_then(|c| c.queue.clone())
}

/// Represents how the controller reaches an execution node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SessionConfig {
    /// Reach the node over SSH.
    Ssh(SshSessionConfig),
    /// The controller is the node.
    Local(LocalSessionConfig),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::Local(Default::default())
    }
}

impl SessionConfig {
    /// Validates the session configuration of the named cloud.
    pub fn validate(&self, cloud: &str) -> Result<()> {
        let workspace = match self {
            Self::Ssh(config) => {
                if config.host.trim().is_empty() {
                    bail!(
                        "configuration value `clouds.session.host` of cloud `{cloud}` cannot be \
                         empty"
                    );
                }

                if config.port == Some(0) {
                    bail!(
                        "configuration value `clouds.session.port` of cloud `{cloud}` cannot be \
                         zero"
                    );
                }

                &config.workspace
            }
            Self::Local(config) => &config.workspace,
        };

        // The workspace is wiped after every run, so it may never be a root or home directory
        if matches!(workspace.trim().trim_end_matches('/'), "" | "~") {
            bail!(
                "configuration value `clouds.session.workspace` of cloud `{cloud}` must be a \
                 dedicated directory"
            );
        }

        Ok(())
    }
}

/// Represents the configuration of an SSH session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SshSessionConfig {
    /// The host of the execution node.
    pub host: String,
    /// The user to log in as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// The SSH port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// The remote working directory.
    pub workspace: String,
}

/// Represents the configuration of a local session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct LocalSessionConfig {
    /// The working directory.
    #[serde(default = "default_local_workspace")]
    pub workspace: String,
}

impl Default for LocalSessionConfig {
    fn default() -> Self {
        Self {
            workspace: default_local_workspace(),
        }
    }
}

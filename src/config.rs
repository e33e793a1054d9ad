//! Implementation of the configuration module.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use lsfrun_engine::CloudConfig;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// The name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "lsfrun.toml";

/// Represents the configuration for the lsfrun CLI tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Where files are staged on the controller.
    #[serde(default)]
    pub staging: StagingConfig,
    /// How jobs are polled.
    #[serde(default)]
    pub poll: PollConfig,
    /// The clouds jobs can run on.
    ///
    /// When empty, jobs are submitted from the local machine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clouds: Vec<CloudConfig>,
}

/// Represents the controller-side staging directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct StagingConfig {
    /// The shared area job scripts and input copies are staged in.
    pub scripts_dir: PathBuf,
    /// The directory of files sent along with every job.
    pub uploads_dir: PathBuf,
    /// The directory per-run storage directories are created in.
    pub runs_dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            scripts_dir: "~/.local/share/lsfrun/scripts".into(),
            uploads_dir: "~/.local/share/lsfrun/uploads".into(),
            runs_dir: "./runs".into(),
        }
    }
}

impl StagingConfig {
    /// Gets the expanded path of the shared script area.
    pub fn scripts_dir(&self) -> Result<PathBuf> {
        expand_path(&self.scripts_dir)
    }

    /// Gets the expanded path of the uploads directory.
    pub fn uploads_dir(&self) -> Result<PathBuf> {
        expand_path(&self.uploads_dir)
    }

    /// Gets the expanded path of the runs directory.
    pub fn runs_dir(&self) -> Result<PathBuf> {
        expand_path(&self.runs_dir)
    }

    /// Validates the staging configuration.
    fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("scripts_dir", &self.scripts_dir),
            ("uploads_dir", &self.uploads_dir),
            ("runs_dir", &self.runs_dir),
        ] {
            if path.as_os_str().is_empty() {
                bail!("configuration value `staging.{name}` cannot be empty");
            }
        }

        Ok(())
    }
}

/// Represents the polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PollConfig {
    /// The default number of minutes between status queries.
    pub interval_minutes: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 1,
        }
    }
}

impl Config {
    /// Validate a configuration
    pub fn validate(&self) -> Result<()> {
        self.staging.validate()?;

        if self.poll.interval_minutes == 0 {
            bail!("configuration value `poll.interval_minutes` cannot be zero");
        }

        let mut names = HashSet::new();
        for cloud in &self.clouds {
            cloud.validate()?;
            if !names.insert(cloud.name.as_str()) {
                bail!(
                    "configuration value `clouds.name` must be unique, but `{name}` is used more \
                     than once",
                    name = cloud.name
                );
            }
        }

        Ok(())
    }

    /// Read a configuration file from the specified path.
    pub fn read_config(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| {
            format!(
                "failed to open config file `{path}`",
                path = path.display()
            )
        })?;
        let config: Config = toml::from_str(&text).with_context(|| {
            format!(
                "failed to parse config file `{path}`",
                path = path.display()
            )
        })?;
        Ok(config)
    }

    /// Write a configuration to the specified path.
    pub fn write_config(&self, path: &Path) -> Result<()> {
        let data = toml::to_string(self).context("failed to serialize config")?;
        std::fs::write(path, data).with_context(|| {
            format!(
                "failed to write config file `{path}`",
                path = path.display()
            )
        })
    }

    /// Loads the configuration.
    ///
    /// An explicit path must exist. Otherwise `lsfrun.toml` is looked up in
    /// the current directory and then in the user configuration directory;
    /// when neither exists the default configuration is used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::read_config(path);
        }

        let candidates = [
            Some(PathBuf::from(CONFIG_FILE_NAME)),
            dirs::config_dir().map(|d| d.join("lsfrun").join(CONFIG_FILE_NAME)),
        ];

        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                debug!(
                    "reading configuration from `{path}`",
                    path = candidate.display()
                );
                return Self::read_config(&candidate);
            }
        }

        debug!("no configuration file found; using the default configuration");
        Ok(Self::default())
    }

    /// Gets the clouds jobs can run on.
    ///
    /// Without configured clouds, a single default cloud submitting from the
    /// local machine is used.
    pub fn clouds(&self) -> Vec<CloudConfig> {
        if self.clouds.is_empty() {
            vec![CloudConfig::default()]
        } else {
            self.clouds.clone()
        }
    }

    /// Resolves the cloud that runs a job with the given execution label.
    pub fn resolve_cloud(&self, label: Option<&str>) -> Result<CloudConfig> {
        let clouds = self.clouds();
        match lsfrun_engine::config::resolve_cloud(&clouds, label) {
            Some(cloud) => Ok(cloud.clone()),
            None => bail!(
                "no cloud can provision label `{label}`",
                label = label.unwrap_or_default()
            ),
        }
    }
}

/// Expands `~` and environment variables in a configured path.
fn expand_path(path: &Path) -> Result<PathBuf> {
    let path = path.to_string_lossy();
    let expanded = shellexpand::full(&path)
        .with_context(|| format!("failed to expand configured path `{path}`"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

//! Implementation of the `uploads` command.

use std::path::PathBuf;

use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;

use crate::config::Config;
use crate::uploads::UploadStore;

/// Arguments for the `uploads` command.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    #[command(subcommand)]
    command: UploadsSubcommand,
}

/// Subcommands for the `uploads` command.
#[derive(Subcommand, Debug, Clone)]
pub enum UploadsSubcommand {
    /// Adds files to send along with every job.
    Add {
        /// The files to add.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Removes previously added files.
    Remove {
        /// The names of the files to remove.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Lists the files sent along with every job.
    List,
}

/// Runs the `uploads` command.
pub fn uploads(args: Args, config: Config) -> Result<()> {
    let store = UploadStore::new(config.staging.uploads_dir()?);

    match args.command {
        UploadsSubcommand::Add { files } => {
            for file in files {
                let name = store.add(&file)?;
                println!("added `{name}`");
            }
        }
        UploadsSubcommand::Remove { names } => {
            let mut missing = Vec::new();
            for name in names {
                if store.remove(&name)? {
                    println!("removed `{name}`");
                } else {
                    missing.push(name);
                }
            }

            if !missing.is_empty() {
                bail!(
                    "no uploaded file is named {names}",
                    names = missing
                        .iter()
                        .map(|n| format!("`{n}`"))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        UploadsSubcommand::List => {
            for name in store.names()? {
                println!("{name}");
            }
        }
    }

    Ok(())
}

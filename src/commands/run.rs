//! Implementation of the `run` command.

use std::io::IsTerminal;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use chrono::Utc;
use clap::Parser;
use lsfrun_engine::CleanupCoordinator;
use lsfrun_engine::CommunicationChannel;
use lsfrun_engine::FileStagingManager;
use lsfrun_engine::JobLog;
use lsfrun_engine::JobOrchestrator;
use lsfrun_engine::JobSpec;
use lsfrun_engine::job::split_list;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::console;
use crate::uploads::UploadStore;

/// Arguments for the `run` command.
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// The job script to run, or `-` to read it from stdin.
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// A comma-delimited list of files to send to the remote node.
    #[arg(long, value_name = "FILES")]
    pub send: Option<String>,

    /// A comma-delimited list of files to download once the job finishes.
    ///
    /// Paths are relative to the remote execution directory.
    #[arg(long, value_name = "FILES")]
    pub download: Option<String>,

    /// The directory downloaded files are saved to.
    ///
    /// Defaults to the run's own directory.
    #[arg(long, value_name = "DIR")]
    pub destination: Option<PathBuf>,

    /// The number of minutes between status queries.
    ///
    /// Defaults to `poll.interval_minutes` of the configuration.
    #[arg(long, value_name = "MINUTES")]
    pub interval_minutes: Option<u64>,

    /// Asks the scheduler to send a notification when the job completes.
    #[arg(long)]
    pub notify: bool,

    /// The execution label selecting the cloud to run on.
    #[arg(long, value_name = "LABEL")]
    pub label: Option<String>,
}

/// Reads the job script.
fn read_script(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut script = String::new();
        std::io::stdin()
            .read_to_string(&mut script)
            .context("failed to read the job script from stdin")?;
        return Ok(script);
    }

    std::fs::read_to_string(path).with_context(|| {
        format!(
            "failed to read job script `{path}`",
            path = path.display()
        )
    })
}

/// Builds the job specification from the command line.
fn job_spec(args: &Args, script: String, config: &Config) -> Result<JobSpec> {
    let minutes = args
        .interval_minutes
        .unwrap_or(config.poll.interval_minutes);
    if minutes == 0 {
        bail!("the poll interval cannot be zero minutes");
    }

    let mut spec = JobSpec::new(script);
    spec.files_to_send = args
        .send
        .as_deref()
        .map(split_list)
        .unwrap_or_default()
        .into_iter()
        .map(PathBuf::from)
        .collect();
    spec.files_to_download = args
        .download
        .as_deref()
        .map(split_list)
        .unwrap_or_default();
    spec.download_destination = args.destination.clone();
    spec.poll_interval = minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .with_context(|| format!("the poll interval of {minutes} minutes is too long"))?;
    spec.notify_on_completion = args.notify;
    spec.label = args.label.clone();
    Ok(spec)
}

/// Creates the storage directory of a new run.
fn create_run_dir(runs_dir: &Path) -> Result<PathBuf> {
    let suffix = Uuid::new_v4().simple().to_string();
    let run_dir = runs_dir.join(format!(
        "{timestamp}-{suffix}",
        timestamp = Utc::now().format("%Y%m%d-%H%M%S"),
        suffix = &suffix[..8]
    ));

    std::fs::create_dir_all(&run_dir).with_context(|| {
        format!(
            "failed to create run directory `{path}`",
            path = run_dir.display()
        )
    })?;
    Ok(run_dir)
}

/// The response to an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Cancel the job and wait for cleanup.
    Cancel,
    /// Exit immediately.
    Exit,
}

/// Responds to an interrupt: the first cancels the job and any later one
/// exits.
fn on_interrupt(token: &CancellationToken) -> Interrupt {
    if token.is_cancelled() {
        return Interrupt::Exit;
    }

    token.cancel();
    Interrupt::Cancel
}

/// Watches for interrupts for the rest of the process.
async fn watch_interrupts(token: CancellationToken) {
    while tokio::signal::ctrl_c().await.is_ok() {
        match on_interrupt(&token) {
            Interrupt::Cancel => {
                info!("interrupted; cancelling the job (interrupt again to exit immediately)");
            }
            Interrupt::Exit => {
                warn!("interrupted again; exiting without cleaning up");
                std::process::exit(130);
            }
        }
    }
}

/// Runs the `run` command.
pub async fn run(args: Args, config: Config) -> Result<()> {
    let script = read_script(&args.script)?;
    let spec = job_spec(&args, script, &config)?;
    spec.validate()?;

    let cloud = config.resolve_cloud(spec.label.as_deref())?;
    let scripts_dir = config.staging.scripts_dir()?;
    let uploads = UploadStore::new(config.staging.uploads_dir()?).paths()?;
    let run_dir = create_run_dir(&config.staging.runs_dir()?)?;
    info!(
        cloud = %cloud.name,
        "storing run files in `{path}`",
        path = run_dir.display()
    );

    let session = cloud.create_session();
    let channel = CommunicationChannel::new(session.clone(), &run_dir);
    let scheduler = cloud.create_scheduler(channel.clone());
    let staging = FileStagingManager::new(session.clone(), &scripts_dir).with_uploads(uploads);
    let cleanup = CleanupCoordinator::new(session, &scripts_dir);

    let (log, events) = JobLog::new();
    let orchestrator = JobOrchestrator::new(scheduler, channel, staging, cleanup)
        .with_clouds(config.clouds())
        .with_log(log);

    let token = CancellationToken::new();
    tokio::spawn(watch_interrupts(token.clone()));

    let printer = tokio::spawn(console::print_events(
        events,
        std::io::stdout().is_terminal(),
    ));

    let success = orchestrator.perform(&spec, token).await;

    // Closing the job log lets the printer drain and finish
    drop(orchestrator);
    printer.await.context("failed to print job events")?;

    if !success {
        bail!("the job did not complete successfully");
    }

    Ok(())
}

//! Incremental streaming of a running job's output.
//!
//! The scheduler materializes the job's output into the progress file on the
//! remote node each cycle. The tracker probes the file's line count and
//! extracts the lines past its offset, so each line is delivered to the job
//! log at most once.

use anyhow::Context;
use anyhow::Result;
use tracing::trace;

use crate::JobEvent;
use crate::JobLog;
use crate::scheduler::RemoteJobHandle;
use crate::scheduler::SchedulerAdapter;
use crate::session::CommunicationChannel;
use crate::session::PROGRESS_FILE;

/// Tracks how much of a running job's output has been delivered.
///
/// Printing is governed by the pending flag set by the previous growth: a
/// cycle prints the range it extracted only when the cycle before it (or the
/// start of the run) observed new output. A growth observed in a cycle makes
/// the next cycle print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTracker {
    /// The number of output lines already delivered.
    offset: u64,
    /// Whether the next extracted range should be printed.
    pending_print: bool,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            offset: 0,
            pending_print: true,
        }
    }
}

impl ProgressTracker {
    /// Constructs a new progress tracker at offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of output lines already delivered.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Determines if the next extracted range should be printed.
    pub fn pending_print(&self) -> bool {
        self.pending_print
    }

    /// Parses the result of a line-count probe (`wc -l <file>`).
    ///
    /// Returns `None` when the first token is not a line count, for example
    /// when the probe failed because the progress file does not exist yet.
    pub fn parse_line_count(probe: &str) -> Option<u64> {
        probe.split_whitespace().next()?.parse().ok()
    }

    /// Records an observed line count.
    ///
    /// Returns whether the range extracted for this observation should be
    /// printed.
    pub fn advance(&mut self, count: u64) -> bool {
        let print = std::mem::take(&mut self.pending_print);
        if self.offset < count {
            self.offset = count;
            self.pending_print = true;
        }

        print
    }

    /// Runs one progress cycle for a running job.
    ///
    /// A probe that does not yield a line count skips the cycle without any
    /// state change or output.
    pub async fn poll_cycle(
        &mut self,
        scheduler: &dyn SchedulerAdapter,
        channel: &CommunicationChannel,
        handle: &RemoteJobHandle,
        log: &JobLog,
    ) -> Result<()> {
        scheduler
            .create_job_progress_file(handle, PROGRESS_FILE)
            .await?;

        let probe = channel
            .capture(&format!("wc -l {PROGRESS_FILE}"))
            .await
            .context("failed to probe the job progress file")?;

        let Some(count) = Self::parse_line_count(&probe.output) else {
            trace!(output = probe.output.as_str(), "progress file is not ready");
            return Ok(());
        };

        scheduler
            .create_formatted_running_job_output_file(PROGRESS_FILE, self.offset, count)
            .await?;
        let output = channel.retrieve().await?;

        if self.advance(count) {
            log.emit(JobEvent::Progress(output));
        }

        Ok(())
    }

    /// Delivers all output past the offset once the job has reached a
    /// terminal status.
    ///
    /// The output is printed unconditionally.
    pub async fn final_flush(
        &self,
        scheduler: &dyn SchedulerAdapter,
        channel: &CommunicationChannel,
        handle: &RemoteJobHandle,
        log: &JobLog,
    ) -> Result<()> {
        scheduler
            .create_finished_job_output_file(handle, self.offset)
            .await?;
        let output = channel.retrieve().await?;
        log.emit(JobEvent::FinalOutput(output));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn line_count_probe() {
        assert_eq!(ProgressTracker::parse_line_count("12 jobProgress\n"), Some(12));
        assert_eq!(ProgressTracker::parse_line_count("  0 jobProgress"), Some(0));
        assert_eq!(
            ProgressTracker::parse_line_count("wc: jobProgress: No such file or directory"),
            None
        );
        assert_eq!(ProgressTracker::parse_line_count(""), None);
    }

    #[test]
    fn prints_once_per_growth() {
        let mut tracker = ProgressTracker::new();
        // The first cycle always prints
        assert!(tracker.advance(0));
        assert!(!tracker.advance(5));
        assert_eq!(tracker.offset(), 5);
        assert!(tracker.pending_print());
        assert!(tracker.advance(5));
        assert!(!tracker.advance(12));
        assert_eq!(tracker.offset(), 12);
        assert!(tracker.advance(12));
        assert!(!tracker.advance(12));
    }

    #[test]
    fn offset_is_monotonic_and_bounded() {
        let mut rng = StdRng::seed_from_u64(0x15f);
        for _ in 0..100 {
            let mut tracker = ProgressTracker::new();
            let mut max = 0;
            for _ in 0..50 {
                let before = tracker.clone();
                let count = rng.random_range(0..200);
                max = max.max(count);
                tracker.advance(count);

                assert!(tracker.offset() >= before.offset());
                assert!(tracker.offset() <= max);
            }
        }
    }
}

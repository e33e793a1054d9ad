//! Rendering of job events to the terminal.

use std::io::Write;

use colored::ColoredString;
use colored::Colorize;
use lsfrun_engine::JobEvent;
use tokio::sync::mpsc::UnboundedReceiver;

/// The width of the banners framing job output.
const BANNER_WIDTH: usize = 60;

/// Renders a banner line.
fn banner(title: &str) -> String {
    format!("{:-^width$}", format!(" {title} "), width = BANNER_WIDTH)
}

/// Paints text when color is enabled.
fn paint(text: &str, color: bool, f: fn(&str) -> ColoredString) -> String {
    if color { f(text).to_string() } else { text.to_string() }
}

/// Renders a job event as the text printed for it.
pub fn render(event: &JobEvent, color: bool) -> String {
    match event {
        JobEvent::Status(status) => format!(
            "{label} {status}\n",
            label = paint("JOB STATUS:", color, |s| s.bold())
        ),
        JobEvent::StatusDetail(detail) => format!("  {}\n", paint(detail, color, |s| s.dimmed())),
        JobEvent::Progress(output) | JobEvent::FinalOutput(output) => {
            let mut rendered = format!(
                "{start}\n\n{output}",
                start = paint(&banner("JOB OUTPUT START"), color, |s| s.cyan())
            );
            if !output.ends_with('\n') {
                rendered.push('\n');
            }

            rendered.push_str(&paint(&banner("JOB OUTPUT END"), color, |s| s.cyan()));
            rendered.push('\n');
            rendered
        }
        JobEvent::Diagnostic(diagnostic) => {
            format!("\n{}\n", paint(diagnostic.trim_end(), color, |s| s.yellow()))
        }
        JobEvent::Message(message) => format!("{message}\n"),
        JobEvent::Error(error) => format!(
            "{label}: {error}\n",
            label = paint("error", color, |s| s.red().bold())
        ),
    }
}

/// Prints job events to stdout until the job log is closed.
pub async fn print_events(mut events: UnboundedReceiver<JobEvent>, color: bool) {
    while let Some(event) = events.recv().await {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout must not take the run (and its cleanup) down with it
        let _ = stdout.write_all(render(&event, color).as_bytes());
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn renders_plain_events() {
        assert_eq!(
            render(&JobEvent::Status("RUN".to_string()), false),
            "JOB STATUS: RUN\n"
        );
        assert_eq!(
            render(&JobEvent::Message("JOB ID: 42".to_string()), false),
            "JOB ID: 42\n"
        );
        assert_eq!(
            render(&JobEvent::Error("boom".to_string()), false),
            "error: boom\n"
        );
        assert_eq!(
            render(&JobEvent::Diagnostic("JOB EXIT CODE: 1\n".to_string()), false),
            "\nJOB EXIT CODE: 1\n"
        );
    }

    #[test]
    fn frames_output() {
        let start = banner("JOB OUTPUT START");
        let end = banner("JOB OUTPUT END");
        assert_eq!(start.len(), BANNER_WIDTH);
        assert!(start.starts_with("---") && start.contains(" JOB OUTPUT START "));

        assert_eq!(
            render(&JobEvent::Progress("line 1\nline 2\n".to_string()), false),
            format!("{start}\n\nline 1\nline 2\n{end}\n")
        );
        assert_eq!(
            render(&JobEvent::FinalOutput("tail".to_string()), false),
            format!("{start}\n\ntail\n{end}\n")
        );
    }
}

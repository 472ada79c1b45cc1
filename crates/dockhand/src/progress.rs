//! Terminal progress for local runs
//!
//! [`ConsoleSink`] is an audit sink: the executor drives it through the
//! [`AuditLog`](dockhand_provision::AuditLog) like any other sink, so the
//! terminal shows exactly what the log file records.

use std::io;
use std::time::Duration;

use console::{Emoji, style};
use dockhand_provision::{LogEntry, LogSink, Severity};
use indicatif::{ProgressBar, ProgressStyle};

static CHECK: Emoji<'_, '_> = Emoji("✔ ", "v ");
static CROSS: Emoji<'_, '_> = Emoji("✖ ", "x ");

/// Captured output lines shown under a failed step
const TAIL_LINES: usize = 12;

/// Spinner while a step runs, one line per entry when it finishes
#[derive(Default)]
pub struct ConsoleSink {
    spinner: Option<ProgressBar>,
    position: Option<(usize, usize)>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn prefix(&self) -> String {
        self.position
            .map(|(index, total)| format!("[{index}/{total}] "))
            .unwrap_or_default()
    }

    fn clear_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl LogSink for ConsoleSink {
    fn write(&mut self, entry: &LogEntry) -> io::Result<()> {
        self.clear_spinner();
        let prefix = self.prefix();

        match entry.severity {
            Severity::Ok => println!("{prefix}{CHECK}{}", entry.text),
            Severity::Info => println!("{prefix}{}", style(&entry.text).dim()),
            Severity::Error => {
                let (headline, tail, hidden) = excerpt(&entry.text, TAIL_LINES);
                eprintln!("{prefix}{}{}", style(CROSS).red(), style(headline).red());
                if hidden > 0 {
                    eprintln!("    {}", style(format!("... {hidden} earlier line(s) omitted")).dim());
                }
                for line in tail {
                    eprintln!("    {}", style(line).dim());
                }
            }
        }
        self.position = None;
        Ok(())
    }

    fn step_started(&mut self, index: usize, total: usize, description: &str) {
        self.clear_spinner();
        self.position = Some((index, total));

        let spinner = ProgressBar::new_spinner();
        let template = format!("{{spinner:.cyan}} [{index}/{total}] {{msg}}");
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(description.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn flush(&mut self) -> io::Result<()> {
        self.clear_spinner();
        Ok(())
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        self.clear_spinner();
    }
}

/// Split an entry into its first line and the last `max` lines of the rest
///
/// Returns the number of lines left out between them.
fn excerpt(text: &str, max: usize) -> (&str, Vec<&str>, usize) {
    let mut lines = text.lines();
    let headline = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();
    let hidden = rest.len().saturating_sub(max);
    (headline, rest[hidden..].to_vec(), hidden)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_output() {
        let (head, tail, hidden) = excerpt("Install Docker packages failed: exit status 100\nE: boom", 12);
        assert_eq!(head, "Install Docker packages failed: exit status 100");
        assert_eq!(tail, ["E: boom"]);
        assert_eq!(hidden, 0);
    }

    #[test]
    fn test_excerpt_keeps_last_lines() {
        let text = std::iter::once("head".to_string())
            .chain((1..=20).map(|i| format!("line {i}")))
            .collect::<Vec<_>>()
            .join("\n");
        let (head, tail, hidden) = excerpt(&text, 5);

        assert_eq!(head, "head");
        assert_eq!(hidden, 15);
        assert_eq!(tail, ["line 16", "line 17", "line 18", "line 19", "line 20"]);
    }

    #[test]
    fn test_excerpt_single_line() {
        let (head, tail, hidden) = excerpt("insufficient privilege", 12);
        assert_eq!(head, "insufficient privilege");
        assert!(tail.is_empty());
        assert_eq!(hidden, 0);
    }
}

//! Progress reporting with TTY detection.
//!
//! In a terminal, fan-out batches render as indicatif progress bars;
//! otherwise output falls back to plain stderr lines so logs stay readable
//! in CI.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use vba_blocks::config;
use vba_blocks::report::{Progress, Reporter};

pub fn is_tty() -> bool {
    std::io::stderr().is_terminal()
}

pub struct CliReporter {
    is_tty: bool,
    bar: Option<ProgressBar>,
}

impl CliReporter {
    pub fn new() -> Self {
        CliReporter {
            is_tty: is_tty(),
            bar: None,
        }
    }

    fn clear_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        match &self.bar {
            Some(bar) => bar.println(format!("  {msg}")),
            None => eprintln!("  {msg}"),
        }
    }

    fn warn(&mut self, msg: &str) {
        match &self.bar {
            Some(bar) => bar.println(format!("warning: {msg}")),
            None => eprintln!("warning: {msg}"),
        }
    }

    fn error(&mut self, msg: &str) {
        self.clear_bar();
        eprintln!("error: {msg}");
    }

    fn progress(&mut self, event: Progress) {
        match event {
            Progress::Started { name, total } => {
                if self.is_tty && total > 0 {
                    let bar = ProgressBar::new(total as u64);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("{msg:>12} [{bar:40}] {pos}/{len}")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=> "),
                    );
                    bar.set_message(name);
                    self.bar = Some(bar);
                }
            }
            Progress::Ticked { .. } => {
                if let Some(bar) = &self.bar {
                    bar.inc(1);
                }
            }
            Progress::Done { .. } => self.clear_bar(),
        }
    }

    fn trace(&mut self, namespace: &str, msg: &str) {
        if config::debug_enabled(namespace) {
            eprintln!("{namespace} {msg}");
        }
    }
}

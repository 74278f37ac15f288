//! Reporting and cancellation threaded through actions.
//!
//! There is no global logger: actions receive a [`Reporter`] and a
//! [`CancelToken`] inside their context value. Progress events describe
//! fan-out batches and do not participate in correctness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A fan-out progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A batch of `total` items is starting.
    Started { name: String, total: usize },
    /// One item of the named batch finished.
    Ticked { name: String },
    /// The named batch completed.
    Done { name: String },
}

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
    fn progress(&mut self, event: Progress);

    /// `DEBUG`-gated diagnostics; default drops them.
    fn trace(&mut self, _namespace: &str, _msg: &str) {}
}

/// Reporter that drops everything; used by tests and embedders.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
    fn progress(&mut self, _event: Progress) {}
}

/// Cooperative cancellation flag shared between an action and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    aborted: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Checkpoint between stages and fan-out batches.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("cancelled");
        }
        Ok(())
    }
}

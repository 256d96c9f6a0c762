//! Console progress for batch runs.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dispatch::ProgressReporter;

/// `done/total` counter redrawn in place on stderr.
///
/// A resumed run starts from a nonzero `initial` so the counter covers the
/// whole batch, including ids recorded by earlier runs.
pub struct ConsoleProgress {
    done: AtomicU64,
    total: u64,
}

impl ConsoleProgress {
    pub fn new(total: u64, initial: u64) -> Self {
        let progress = Self {
            done: AtomicU64::new(initial.min(total)),
            total,
        };
        progress.render();
        progress
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Terminate the redrawn line so later output starts on a fresh one.
    pub fn finish(&self) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err);
    }

    fn render(&self) {
        let done = self.done();
        let mut err = std::io::stderr().lock();
        // A failed stderr write must not fail the run.
        let _ = write!(err, "\r{done}/{total} tasks", total = self.total);
        let _ = err.flush();
    }
}

impl ProgressReporter for ConsoleProgress {
    fn advance(&self, n: u64) {
        self.done.fetch_add(n, Ordering::Relaxed);
        self.render();
    }
}

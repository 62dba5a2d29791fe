//! Periodic flushing of a running program to disk.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// When a flush is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// After every `n`-th reported generation.
    EveryGenerations(usize),
    /// When at least this long has passed since the last flush.
    EverySeconds(u64),
}

/// How the target file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Each flush appends another record.
    Append,
    /// Each flush replaces the file.
    #[default]
    Overwrite,
}

/// What is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncTarget {
    /// The current generation stream.
    Generation,
    /// The whole program state.
    #[default]
    State,
}

/// Flushes a program to a file on a schedule.
#[derive(Debug, Clone)]
pub struct SyncScheduler {
    trigger: SyncTrigger,
    mode: SyncMode,
    target: SyncTarget,
    path: PathBuf,
    last: Instant,
}

impl SyncScheduler {
    /// Overwrite the full state at `path` whenever `trigger` fires.
    pub fn new(path: impl Into<PathBuf>, trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            mode: SyncMode::default(),
            target: SyncTarget::default(),
            path: path.into(),
            last: Instant::now(),
        }
    }

    /// Set the file mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set what is flushed.
    #[must_use]
    pub fn with_target(mut self, target: SyncTarget) -> Self {
        self.target = target;
        self
    }

    /// File written to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What is flushed.
    #[must_use]
    pub fn target(&self) -> SyncTarget {
        self.target
    }

    /// Whether a flush is due after reporting `generation`. Resets the timer
    /// when it is.
    pub(crate) fn due(&mut self, generation: usize) -> bool {
        let due = match self.trigger {
            SyncTrigger::EveryGenerations(n) => n > 0 && generation % n == 0,
            SyncTrigger::EverySeconds(s) => self.last.elapsed() >= Duration::from_secs(s),
        };
        if due {
            self.last = Instant::now();
        }
        due
    }

    pub(crate) fn open(&self) -> io::Result<BufWriter<File>> {
        let file = match self.mode {
            SyncMode::Append => OpenOptions::new().create(true).append(true).open(&self.path)?,
            SyncMode::Overwrite => File::create(&self.path)?,
        };
        Ok(BufWriter::new(file))
    }
}

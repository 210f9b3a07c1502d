//! Captures the process id of the test process.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::agent::event::VersionsEvent;
use crate::agent::listener::{done, ExecutionEventListener, ListenerFuture};

/// Value of [`PidReader::pid`] before a pid was reported.
pub const UNKNOWN_PID: i64 = -1;

/// Remembers the `pid` reported with the agent's versions.
#[derive(Debug)]
pub struct PidReader {
    pid: AtomicI64,
}

impl PidReader {
    /// A reader with no pid yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: AtomicI64::new(UNKNOWN_PID),
        }
    }

    /// Reported pid, or [`UNKNOWN_PID`].
    #[must_use]
    pub fn pid(&self) -> i64 {
        self.pid.load(Ordering::Acquire)
    }
}

impl Default for PidReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEventListener for PidReader {
    fn handle_versions<'a>(&'a self, event: &'a VersionsEvent) -> ListenerFuture<'a> {
        if let Some(pid) = event.versions.pid {
            self.pid.store(pid, Ordering::Release);
        }
        done()
    }
}

//! Execution console: reports test progress through `tracing`.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info, warn};

use crate::agent::event::{
    LibraryImportEvent, LogLevel, LogMessageEvent, MessageEvent, OutputFileEvent, Status,
    SuiteEndedEvent, SuiteStartedEvent, TestEndedEvent, TestStartedEvent,
};
use crate::agent::listener::{done, ExecutionEventListener, ListenerFuture};

/// Logs suites, tests, agent messages and the output file.
#[derive(Debug, Default)]
pub struct EventLogger {
    passed: AtomicU32,
    failed: AtomicU32,
    skipped: AtomicU32,
}

impl EventLogger {
    /// A logger with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(passed, failed, skipped)` tests seen so far.
    #[must_use]
    pub fn totals(&self) -> (u32, u32, u32) {
        (
            self.passed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
        )
    }
}

impl ExecutionEventListener for EventLogger {
    fn handle_library_import<'a>(&'a self, event: &'a LibraryImportEvent) -> ListenerFuture<'a> {
        debug!(library = event.name.as_str(), source = ?event.source, "library imported");
        done()
    }

    fn handle_suite_started<'a>(&'a self, event: &'a SuiteStartedEvent) -> ListenerFuture<'a> {
        info!(suite = event.name.as_str(), tests = event.total_tests, "suite started");
        done()
    }

    fn handle_suite_ended<'a>(&'a self, event: &'a SuiteEndedEvent) -> ListenerFuture<'a> {
        info!(
            suite = event.name.as_str(),
            status = ?event.status,
            elapsed_ms = event.elapsed_time,
            "suite ended"
        );
        done()
    }

    fn handle_test_started<'a>(&'a self, event: &'a TestStartedEvent) -> ListenerFuture<'a> {
        info!(test = event.long_name.as_str(), "test started");
        done()
    }

    fn handle_test_ended<'a>(&'a self, event: &'a TestEndedEvent) -> ListenerFuture<'a> {
        let counter = match event.status {
            Status::Pass => &self.passed,
            Status::Fail => &self.failed,
            Status::Skip | Status::NotRun => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match &event.error_message {
            Some(message) if event.status == Status::Fail => warn!(
                test = event.long_name.as_str(),
                elapsed_ms = event.elapsed_time,
                error = message.as_str(),
                "test failed"
            ),
            _ => info!(
                test = event.long_name.as_str(),
                status = ?event.status,
                elapsed_ms = event.elapsed_time,
                "test ended"
            ),
        }
        done()
    }

    fn handle_log_message<'a>(&'a self, event: &'a LogMessageEvent) -> ListenerFuture<'a> {
        log_agent_message(event.level, &event.message);
        done()
    }

    fn handle_message<'a>(&'a self, event: &'a MessageEvent) -> ListenerFuture<'a> {
        log_agent_message(event.level, &event.message);
        done()
    }

    fn handle_output_file<'a>(&'a self, event: &'a OutputFileEvent) -> ListenerFuture<'a> {
        match &event.path {
            Some(path) => info!(path = %path.display(), "output file written"),
            None => debug!("no output file"),
        }
        done()
    }

    fn handle_paused(&self) -> ListenerFuture<'_> {
        info!("execution paused");
        done()
    }

    fn handle_resumed(&self) -> ListenerFuture<'_> {
        info!("execution resumed");
        done()
    }

    fn events_processing_finished(&self) {
        let (passed, failed, skipped) = self.totals();
        info!(passed, failed, skipped, "execution finished");
    }
}

fn log_agent_message(level: LogLevel, message: &str) {
    match level {
        LogLevel::Error | LogLevel::Fail => warn!(agent_level = ?level, "{message}"),
        LogLevel::Warn => warn!("{message}"),
        LogLevel::Info | LogLevel::Html => info!("{message}"),
        LogLevel::Debug | LogLevel::Trace | LogLevel::None => debug!("{message}"),
    }
}

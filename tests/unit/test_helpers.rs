//! Shared fixtures for unit tests: an in-memory agent connection and a
//! listener that records everything it sees.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

use robot_agent_server::agent::client::AgentClient;
use robot_agent_server::agent::event::{
    AgentInitializingEvent, KeywordEvent, ReadyToStartEvent, SuiteStartedEvent, VersionsEvent,
};
use robot_agent_server::agent::listener::{done, ExecutionEventListener, ListenerFuture};
use robot_agent_server::AppError;

/// Reads what an [`AgentClient`] wrote, one frame at a time.
pub struct Wire {
    lines: Lines<BufReader<DuplexStream>>,
}

impl Wire {
    /// Next written frame, or `None` if nothing arrives within `wait`.
    pub async fn next_line_within(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.lines.next_line())
            .await
            .ok()
            .and_then(|line| line.expect("wire read must not fail"))
    }

    /// Next written frame; fails the test after two seconds.
    pub async fn next_line(&mut self) -> String {
        self.next_line_within(Duration::from_secs(2))
            .await
            .expect("a frame must be written")
    }

    /// Next written frame parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        let line = self.next_line().await;
        serde_json::from_str(&line).expect("frames must be valid JSON")
    }
}

/// A client writing into memory plus the reader of what it wrote.
pub fn client_pair() -> (Arc<AgentClient>, Wire) {
    client_pair_with_workers(2)
}

/// Like [`client_pair`] with an explicit reply pool size.
pub fn client_pair_with_workers(workers: usize) -> (Arc<AgentClient>, Wire) {
    let (writer, reader) = tokio::io::duplex(256 * 1024);
    let client = Arc::new(AgentClient::new(4242, writer, workers));
    let wire = Wire {
        lines: BufReader::new(reader).lines(),
    };
    (client, wire)
}

/// Shared, ordered record of listener calls.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Fresh empty journal.
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a journal.
pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal lock").clone()
}

/// Listener appending `"<name>:<event>"` to a shared journal.
pub struct RecordingListener {
    name: &'static str,
    journal: Journal,
    handling: AtomicBool,
    fail_on: Option<&'static str>,
    panic_on: Option<&'static str>,
}

impl RecordingListener {
    /// Recorder that never fails.
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Arc::clone(journal),
            handling: AtomicBool::new(true),
            fail_on: None,
            panic_on: None,
        }
    }

    /// Fail with a protocol error when `event` arrives.
    #[must_use]
    pub fn failing_on(mut self, event: &'static str) -> Self {
        self.fail_on = Some(event);
        self
    }

    /// Panic when `event` arrives.
    #[must_use]
    pub fn panicking_on(mut self, event: &'static str) -> Self {
        self.panic_on = Some(event);
        self
    }

    /// Start out not handling events.
    #[must_use]
    pub fn idle(self) -> Self {
        self.handling.store(false, Ordering::SeqCst);
        self
    }

    fn record(&self, event: &str) -> ListenerFuture<'_> {
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("{}:{event}", self.name));
        assert!(self.panic_on != Some(event), "listener {} panicked", self.name);
        if self.fail_on == Some(event) {
            let err = AppError::Protocol(format!("{} rejected {event}", self.name));
            return Box::pin(std::future::ready(Err(err)));
        }
        done()
    }
}

impl ExecutionEventListener for RecordingListener {
    fn events_processing_about_to_start(&self, _client: &Arc<AgentClient>) {
        let _ = self.record("about_to_start");
    }

    fn is_handling_events(&self) -> bool {
        self.handling.load(Ordering::SeqCst)
    }

    fn handle_agent_initializing<'a>(
        &'a self,
        _event: &'a AgentInitializingEvent,
    ) -> ListenerFuture<'a> {
        self.record("agent_initializing")
    }

    fn handle_versions<'a>(&'a self, _event: &'a VersionsEvent) -> ListenerFuture<'a> {
        self.record("version")
    }

    fn handle_ready_to_start<'a>(&'a self, _event: &'a ReadyToStartEvent) -> ListenerFuture<'a> {
        self.record("ready_to_start")
    }

    fn handle_suite_started<'a>(&'a self, _event: &'a SuiteStartedEvent) -> ListenerFuture<'a> {
        self.record("start_suite")
    }

    fn handle_keyword_started<'a>(&'a self, _event: &'a KeywordEvent) -> ListenerFuture<'a> {
        self.record("start_keyword")
    }

    fn handle_paused(&self) -> ListenerFuture<'_> {
        self.record("paused")
    }

    fn handle_resumed(&self) -> ListenerFuture<'_> {
        self.record("resumed")
    }

    fn handle_closed(&self) -> ListenerFuture<'_> {
        self.handling.store(false, Ordering::SeqCst);
        self.record("close")
    }

    fn events_processing_finished(&self) {
        let _ = self.record("finished");
    }
}

/// Boxed listener list for a dispatcher or server.
pub fn listeners(
    items: impl IntoIterator<Item = Arc<dyn ExecutionEventListener>>,
) -> Vec<Arc<dyn ExecutionEventListener>> {
    items.into_iter().collect()
}

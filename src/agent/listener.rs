//! Listener capability shared by every consumer of agent events.
//!
//! Every handler has a completed no-op default, so a listener overrides only
//! the events it cares about and the dispatcher never needs to know which
//! listener is interested in what.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::agent::client::AgentClient;
use crate::agent::event::{
    AgentInitializingEvent, ConditionEvaluatedEvent, ExpressionEvaluatedEvent, KeywordEvent,
    LibraryImportEvent, LogMessageEvent, MessageEvent, OutputFileEvent, ReadyToStartEvent,
    ResourceImportEvent, ShouldContinueEvent, SuiteEndedEvent, SuiteStartedEvent,
    TestEndedEvent, TestStartedEvent, VariablesEvent, VersionsEvent,
};
use crate::Result;

/// Future returned by every event handler.
pub type ListenerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// An already-completed successful handler result.
#[must_use]
pub fn done<'a>() -> ListenerFuture<'a> {
    Box::pin(std::future::ready(Ok(())))
}

/// Receives the events of one dispatch run.
///
/// Handlers run inline on the dispatch loop, one listener after the other,
/// in registration order. A handler returning `Err` aborts the loop; only
/// blocking that is the point of the listener (such as holding the agent
/// before start) belongs inside a handler.
pub trait ExecutionEventListener: Send + Sync {
    /// Called once before the first frame is read.
    fn events_processing_about_to_start(&self, _client: &Arc<AgentClient>) {}

    /// Whether this listener still wants events. The loop keeps running
    /// while at least one registered listener returns `true`.
    fn is_handling_events(&self) -> bool {
        true
    }

    /// `agent_initializing`: the agent waits for its operating mode.
    fn handle_agent_initializing<'a>(
        &'a self,
        _event: &'a AgentInitializingEvent,
    ) -> ListenerFuture<'a> {
        done()
    }

    /// `version`: the agent waits for a protocol verdict.
    fn handle_versions<'a>(&'a self, _event: &'a VersionsEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `ready_to_start`: the agent waits for `do_start`.
    fn handle_ready_to_start<'a>(&'a self, _event: &'a ReadyToStartEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `resource_import`
    fn handle_resource_import<'a>(
        &'a self,
        _event: &'a ResourceImportEvent,
    ) -> ListenerFuture<'a> {
        done()
    }

    /// `library_import`
    fn handle_library_import<'a>(&'a self, _event: &'a LibraryImportEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `start_suite`
    fn handle_suite_started<'a>(&'a self, _event: &'a SuiteStartedEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `end_suite`
    fn handle_suite_ended<'a>(&'a self, _event: &'a SuiteEndedEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `start_test`
    fn handle_test_started<'a>(&'a self, _event: &'a TestStartedEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `end_test`
    fn handle_test_ended<'a>(&'a self, _event: &'a TestEndedEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `pre_start_keyword`
    fn handle_keyword_about_to_start<'a>(&'a self, _event: &'a KeywordEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `start_keyword`
    fn handle_keyword_started<'a>(&'a self, _event: &'a KeywordEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `pre_end_keyword`
    fn handle_keyword_about_to_end<'a>(&'a self, _event: &'a KeywordEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `end_keyword`
    fn handle_keyword_ended<'a>(&'a self, _event: &'a KeywordEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `variables`
    fn handle_variables<'a>(&'a self, _event: &'a VariablesEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `should_continue`: the agent waits for `continue`, `pause`,
    /// `terminate` or `disconnect`.
    fn handle_should_continue<'a>(
        &'a self,
        _event: &'a ShouldContinueEvent,
    ) -> ListenerFuture<'a> {
        done()
    }

    /// `condition_result`
    fn handle_condition_evaluated<'a>(
        &'a self,
        _event: &'a ConditionEvaluatedEvent,
    ) -> ListenerFuture<'a> {
        done()
    }

    /// `expression_result`
    fn handle_expression_evaluated<'a>(
        &'a self,
        _event: &'a ExpressionEvaluatedEvent,
    ) -> ListenerFuture<'a> {
        done()
    }

    /// `paused`
    fn handle_paused(&self) -> ListenerFuture<'_> {
        done()
    }

    /// `resumed`
    fn handle_resumed(&self) -> ListenerFuture<'_> {
        done()
    }

    /// `log_message`
    fn handle_log_message<'a>(&'a self, _event: &'a LogMessageEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `message`
    fn handle_message<'a>(&'a self, _event: &'a MessageEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `output_file`
    fn handle_output_file<'a>(&'a self, _event: &'a OutputFileEvent) -> ListenerFuture<'a> {
        done()
    }

    /// `close`: the agent is about to disconnect.
    fn handle_closed(&self) -> ListenerFuture<'_> {
        done()
    }

    /// Called exactly once after the loop ends, however it ends.
    fn events_processing_finished(&self) {}
}

/// Listener that ignores everything and never asks the loop to stop.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ExecutionEventListener for NoopListener {}

//! The dispatch loop.
//!
//! [`EventDispatcher::run_events_loop`] reads one frame at a time, decodes
//! it, and awaits the matching handler of every registered listener in
//! registration order before reading the next frame. Events therefore reach
//! listeners in wire order, one at a time.
//!
//! # Termination
//!
//! The loop ends when the stream ends, when no listener reports
//! [`is_handling_events`](ExecutionEventListener::is_handling_events) any
//! more, when a handler fails, or when a `version` handshake frame cannot be
//! decoded. Other bad frames never end it. However it ends (including a
//! panic inside a handler or the loop future being dropped), every listener
//! receives
//! [`events_processing_finished`](ExecutionEventListener::events_processing_finished)
//! exactly once.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::agent::client::AgentClient;
use crate::agent::codec::AgentCodec;
use crate::agent::decoder::{decode_line, AgentMessage, Decoded, Skip};
use crate::agent::event::{
    AgentInitializingEvent, KeywordPhase, ReadyToStartEvent, ShouldContinueEvent, VersionsEvent,
};
use crate::agent::listener::ExecutionEventListener;
use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::{AppError, Result};

/// Await `$call` for every listener in order, stopping at the first error.
macro_rules! notify_all {
    ($listeners:expr, |$listener:ident| $call:expr) => {
        async {
            for $listener in $listeners {
                $call.await?;
            }
            Ok::<(), AppError>(())
        }
        .await
    };
}

/// Delivers `events_processing_finished` when the loop is left by any path.
struct FinishGuard<'a> {
    listeners: &'a [Arc<dyn ExecutionEventListener>],
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        for listener in self.listeners {
            listener.events_processing_finished();
        }
    }
}

/// Reads agent frames and fans the decoded events out to listeners.
pub struct EventDispatcher {
    client: Arc<AgentClient>,
    listeners: Vec<Arc<dyn ExecutionEventListener>>,
    max_frame_bytes: usize,
}

impl EventDispatcher {
    /// Create a dispatcher for `client` delivering to `listeners` in order.
    #[must_use]
    pub fn new(client: Arc<AgentClient>, listeners: Vec<Arc<dyn ExecutionEventListener>>) -> Self {
        Self {
            client,
            listeners,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Override the longest accepted inbound frame.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Client events are attached to.
    #[must_use]
    pub fn client(&self) -> &Arc<AgentClient> {
        &self.client
    }

    /// Run the loop over `reader` until it terminates.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if reading the stream fails.
    /// - `AppError::Protocol` if a listener handler fails; errors of other
    ///   kinds raised by a handler are wrapped into this variant.
    pub async fn run_events_loop<R>(&self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let client_id = self.client.id();
        let _finish = FinishGuard {
            listeners: &self.listeners,
        };

        for listener in &self.listeners {
            listener.events_processing_about_to_start(&self.client);
        }

        let mut frames = FramedRead::new(reader, AgentCodec::with_max_length(self.max_frame_bytes));
        let mut after_bad_frame = false;

        while self.is_any_listener_handling_events() {
            let line = match frames.next().await {
                // FramedRead yields a single `None` after a decoder error;
                // the stream itself goes on.
                None if after_bad_frame => {
                    after_bad_frame = false;
                    continue;
                }
                None => {
                    debug!(client_id, "dispatcher: end of stream");
                    break;
                }
                Some(Err(AppError::Codec(msg))) => {
                    warn!(client_id, error = msg.as_str(), "dispatcher: bad frame, skipping");
                    after_bad_frame = true;
                    continue;
                }
                Some(Err(e)) => {
                    warn!(client_id, error = %e, "dispatcher: read failed, stopping");
                    return Err(e);
                }
                Some(Ok(line)) => line,
            };

            match decode_line(&line) {
                Decoded::Message(message) => self.dispatch(message).await?,
                Decoded::Skip(skip) if skip.is_handshake_violation() => {
                    warn!(client_id, ?skip, "dispatcher: malformed handshake, stopping");
                    return Err(AppError::Protocol(format!("malformed handshake frame: {skip:?}")));
                }
                Decoded::Skip(skip) => log_skip(client_id, &skip),
            }
        }

        debug!(client_id, "dispatcher: events loop finished");
        Ok(())
    }

    fn is_any_listener_handling_events(&self) -> bool {
        self.listeners
            .iter()
            .any(|listener| listener.is_handling_events())
    }

    async fn dispatch(&self, message: AgentMessage) -> Result<()> {
        let tag = message.tag();
        trace!(client_id = self.client.id(), tag, "dispatcher: event received");
        let listeners = &self.listeners;

        let outcome = match message {
            AgentMessage::AgentInitializing => {
                let event = AgentInitializingEvent {
                    client: Arc::clone(&self.client),
                };
                notify_all!(listeners, |l| l.handle_agent_initializing(&event))
            }
            AgentMessage::Versions(versions) => {
                let event = VersionsEvent {
                    client: Arc::clone(&self.client),
                    versions,
                };
                notify_all!(listeners, |l| l.handle_versions(&event))
            }
            AgentMessage::ReadyToStart => {
                let event = ReadyToStartEvent {
                    client: Arc::clone(&self.client),
                };
                notify_all!(listeners, |l| l.handle_ready_to_start(&event))
            }
            AgentMessage::ShouldContinue(pausing_point) => {
                let event = ShouldContinueEvent {
                    client: Arc::clone(&self.client),
                    pausing_point,
                };
                notify_all!(listeners, |l| l.handle_should_continue(&event))
            }
            AgentMessage::ResourceImport(event) => {
                notify_all!(listeners, |l| l.handle_resource_import(&event))
            }
            AgentMessage::LibraryImport(event) => {
                notify_all!(listeners, |l| l.handle_library_import(&event))
            }
            AgentMessage::SuiteStarted(event) => {
                notify_all!(listeners, |l| l.handle_suite_started(&event))
            }
            AgentMessage::SuiteEnded(event) => {
                notify_all!(listeners, |l| l.handle_suite_ended(&event))
            }
            AgentMessage::TestStarted(event) => {
                notify_all!(listeners, |l| l.handle_test_started(&event))
            }
            AgentMessage::TestEnded(event) => {
                notify_all!(listeners, |l| l.handle_test_ended(&event))
            }
            AgentMessage::Keyword(event) => match event.phase {
                KeywordPhase::AboutToStart => {
                    notify_all!(listeners, |l| l.handle_keyword_about_to_start(&event))
                }
                KeywordPhase::Started => {
                    notify_all!(listeners, |l| l.handle_keyword_started(&event))
                }
                KeywordPhase::AboutToEnd => {
                    notify_all!(listeners, |l| l.handle_keyword_about_to_end(&event))
                }
                KeywordPhase::Ended => {
                    notify_all!(listeners, |l| l.handle_keyword_ended(&event))
                }
            },
            AgentMessage::Variables(event) => {
                notify_all!(listeners, |l| l.handle_variables(&event))
            }
            AgentMessage::ConditionEvaluated(event) => {
                notify_all!(listeners, |l| l.handle_condition_evaluated(&event))
            }
            AgentMessage::ExpressionEvaluated(event) => {
                notify_all!(listeners, |l| l.handle_expression_evaluated(&event))
            }
            AgentMessage::Paused => notify_all!(listeners, |l| l.handle_paused()),
            AgentMessage::Resumed => notify_all!(listeners, |l| l.handle_resumed()),
            AgentMessage::LogMessage(event) => {
                notify_all!(listeners, |l| l.handle_log_message(&event))
            }
            AgentMessage::Message(event) => {
                notify_all!(listeners, |l| l.handle_message(&event))
            }
            AgentMessage::OutputFile(event) => {
                notify_all!(listeners, |l| l.handle_output_file(&event))
            }
            AgentMessage::Closed => notify_all!(listeners, |l| l.handle_closed()),
        };

        outcome.map_err(|e| {
            warn!(client_id = self.client.id(), tag, error = %e, "dispatcher: listener failed, stopping");
            match e {
                AppError::Protocol(_) => e,
                other => AppError::Protocol(format!("{tag} handler failed: {other}")),
            }
        })
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("client", &self.client)
            .field("listeners", &self.listeners.len())
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}

fn log_skip(client_id: u32, skip: &Skip) {
    match skip {
        Skip::Blank => trace!(client_id, "dispatcher: blank line"),
        Skip::Malformed(reason) => {
            warn!(client_id, error = reason.as_str(), "dispatcher: malformed frame, skipping");
        }
        Skip::NotAnObject | Skip::Empty => {
            debug!(client_id, "dispatcher: frame is not a keyed object, skipping");
        }
        Skip::Unknown(tag) => {
            debug!(client_id, tag = tag.as_str(), "dispatcher: unknown event, skipping");
        }
        Skip::InvalidPayload { tag, reason } => warn!(
            client_id,
            tag = tag.as_str(),
            error = reason.as_str(),
            "dispatcher: unexpected payload shape, skipping"
        ),
    }
}

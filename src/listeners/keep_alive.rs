//! Keeps the dispatch loop running until told otherwise.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::agent::listener::{done, ExecutionEventListener, ListenerFuture};

/// Votes to keep handling events until [`stop_handling_events`] is called
/// or the agent sends `close`.
///
/// Since the loop runs while any listener still handles events, a
/// `KeepAliveListener` is also the switch that lets a caller end it.
///
/// [`stop_handling_events`]: KeepAliveListener::stop_handling_events
#[derive(Debug)]
pub struct KeepAliveListener {
    handling: AtomicBool,
}

impl KeepAliveListener {
    /// A listener that keeps the loop alive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handling: AtomicBool::new(true),
        }
    }

    /// Withdraw the vote; takes effect before the next frame is read.
    pub fn stop_handling_events(&self) {
        self.handling.store(false, Ordering::Release);
    }
}

impl Default for KeepAliveListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEventListener for KeepAliveListener {
    fn is_handling_events(&self) -> bool {
        self.handling.load(Ordering::Acquire)
    }

    fn handle_closed(&self) -> ListenerFuture<'_> {
        debug!("keep-alive: agent closed the session");
        self.stop_handling_events();
        done()
    }
}

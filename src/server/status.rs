//! Connection lifecycle observers.

use tracing::{info, warn};

use crate::AppError;

/// Observer of the server's connection lifecycle.
///
/// Every method defaults to a no-op. Callbacks run on the server task and
/// must return quickly.
pub trait ServerStatusListener: Send + Sync {
    /// The listening socket is bound.
    fn server_established(&self, _host: &str, _port: u16) {}

    /// An agent connected.
    fn client_connected(&self, _client_id: u32) {}

    /// The agent connection ended, however it ended.
    fn client_connection_closed(&self, _client_id: u32) {}

    /// No agent connected within the accept timeout.
    fn client_connection_timed_out(&self, _error: &AppError) {}

    /// Binding, accepting or reading failed.
    fn client_connection_error(&self, _error: &AppError) {}

    /// A listener aborted the dispatch loop with a protocol error.
    fn client_event_handling_error(&self, _error: &AppError) {}
}

/// Reports every lifecycle transition through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusListener;

impl ServerStatusListener for TracingStatusListener {
    fn server_established(&self, host: &str, port: u16) {
        info!(host, port, "agent server listening");
    }

    fn client_connected(&self, client_id: u32) {
        info!(client_id, "agent connected");
    }

    fn client_connection_closed(&self, client_id: u32) {
        info!(client_id, "agent connection closed");
    }

    fn client_connection_timed_out(&self, error: &AppError) {
        warn!(%error, "agent did not connect in time");
    }

    fn client_connection_error(&self, error: &AppError) {
        warn!(%error, "agent connection error");
    }

    fn client_event_handling_error(&self, error: &AppError) {
        warn!(%error, "agent event handling error");
    }
}

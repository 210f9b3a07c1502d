//! Start gate: holds the agent before it runs any test content.
//!
//! On `agent_initializing` the agent is told its mode and that it must wait
//! for permission. On `ready_to_start` the dispatch loop blocks on a
//! zero-permit semaphore until [`TestsStarter::allow_client_tests_start`]
//! releases it, then `do_start` is sent. The caller uses the gap to finish
//! its own setup (for example attaching a debugger UI).

use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::agent::event::{AgentInitializingEvent, ReadyToStartEvent};
use crate::agent::listener::{ExecutionEventListener, ListenerFuture};
use crate::agent::response::{ExecutionMode, ServerResponse};
use crate::{AppError, Result};

/// Listener gating test start on an explicit permission.
#[derive(Debug)]
pub struct TestsStarter {
    mode: ExecutionMode,
    permits: Semaphore,
    start_timeout: Option<Duration>,
}

impl TestsStarter {
    /// Gate announcing `mode` and waiting indefinitely for permission.
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            permits: Semaphore::new(0),
            start_timeout: None,
        }
    }

    /// Give up waiting for permission after `timeout`.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Mode announced to the agent.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Let the agent start. Permits accumulate; one is consumed per
    /// `ready_to_start`.
    pub fn allow_client_tests_start(&self) {
        self.permits.add_permits(1);
        debug!("tests starter: start allowed");
    }

    /// Abandon the wait. A pending or later `ready_to_start` fails with a
    /// protocol error instead of blocking.
    pub fn interrupt(&self) {
        self.permits.close();
        debug!("tests starter: interrupted");
    }

    async fn announce_mode(&self, event: &AgentInitializingEvent) -> Result<()> {
        debug!(client_id = event.client.id(), mode = self.mode.as_str(), "tests starter: sending operating mode");
        event
            .client
            .send(&ServerResponse::OperatingMode {
                mode: self.mode,
                wait_for_start_allowance: true,
            })
            .await
    }

    async fn wait_and_start(&self, event: &ReadyToStartEvent) -> Result<()> {
        let client_id = event.client.id();
        info!(client_id, "tests starter: agent ready, waiting for start permission");

        let acquired = match self.start_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.permits.acquire())
                .await
                .map_err(|_| {
                    warn!(client_id, ?timeout, "tests starter: start permission timed out");
                    AppError::Protocol(format!(
                        "tests were not allowed to start within {} ms",
                        timeout.as_millis()
                    ))
                })?,
            None => self.permits.acquire().await,
        };

        let permit = acquired.map_err(|_| {
            AppError::Protocol("interrupted while waiting for permission to start tests".into())
        })?;
        permit.forget();

        event.client.send(&ServerResponse::DoStart).await?;
        info!(client_id, "tests starter: tests started");
        Ok(())
    }
}

impl ExecutionEventListener for TestsStarter {
    fn handle_agent_initializing<'a>(
        &'a self,
        event: &'a AgentInitializingEvent,
    ) -> ListenerFuture<'a> {
        Box::pin(self.announce_mode(event))
    }

    fn handle_ready_to_start<'a>(&'a self, event: &'a ReadyToStartEvent) -> ListenerFuture<'a> {
        Box::pin(self.wait_and_start(event))
    }
}

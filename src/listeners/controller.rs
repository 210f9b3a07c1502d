//! User-driven execution control: pause, resume, terminate, evaluate.
//!
//! The agent only listens at well-defined points. Requests made while it is
//! running are queued and delivered as the answer to its next
//! `should_continue` query; requests made while it is paused are written
//! immediately.
//!
//! Expression evaluations are serialised: the next one is only sent after
//! the `expression_result` of the previous one arrived.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::agent::client::AgentClient;
use crate::agent::event::{ExpressionEvaluatedEvent, ShouldContinueEvent};
use crate::agent::listener::{done, ExecutionEventListener, ListenerFuture};
use crate::agent::response::{ExpressionType, ServerResponse, VariableScope};
use crate::{AppError, Result};

/// Request waiting for the next `should_continue` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingRequest {
    Pause,
    Terminate,
    Disconnect,
}

impl PendingRequest {
    fn response(self) -> ServerResponse {
        match self {
            Self::Pause => ServerResponse::Pause,
            Self::Terminate => ServerResponse::Terminate,
            Self::Disconnect => ServerResponse::Disconnect,
        }
    }
}

#[derive(Debug, Default)]
struct ControlState {
    client: Option<Arc<AgentClient>>,
    paused: bool,
    pending: Option<PendingRequest>,
    evaluation: Option<(u32, OwnedSemaphorePermit)>,
}

/// Steers a running agent on behalf of a user or a debugger front end.
#[derive(Debug)]
pub struct ProcessController {
    state: Mutex<ControlState>,
    evaluations: Arc<Semaphore>,
}

impl ProcessController {
    /// A controller with no client attached yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState::default()),
            evaluations: Arc::new(Semaphore::new(1)),
        }
    }

    /// Whether the agent reported it is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Suspend at the next pausing point.
    pub fn pause(&self) {
        let mut state = self.lock();
        if !state.paused && state.pending.is_none() {
            state.pending = Some(PendingRequest::Pause);
            debug!("controller: pause requested");
        }
    }

    /// Leave the paused state, or cancel a pause that was not delivered yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if writing `resume` fails, or
    /// `AppError::Protocol` if no agent is connected.
    pub async fn resume(&self) -> Result<()> {
        let client = {
            let mut state = self.lock();
            if !state.paused {
                if state.pending == Some(PendingRequest::Pause) {
                    state.pending = None;
                    debug!("controller: pending pause cancelled");
                }
                return Ok(());
            }
            Self::attached(&state)?
        };
        client.send(&ServerResponse::Resume).await
    }

    /// Kill the test process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails, or `AppError::Protocol` if
    /// no agent is connected.
    pub async fn terminate(&self) -> Result<()> {
        self.request(PendingRequest::Terminate).await
    }

    /// Detach from the agent and let it run to completion on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails, or `AppError::Protocol` if
    /// no agent is connected.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(PendingRequest::Disconnect).await
    }

    /// Change a variable in the paused stack frame `level`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the agent is not paused or not
    /// connected, `AppError::Io` if the write fails.
    pub async fn change_variable(
        &self,
        name: &str,
        scope: VariableScope,
        level: u32,
        values: Vec<String>,
    ) -> Result<()> {
        let client = self.paused_client("change a variable")?;
        client
            .send(&ServerResponse::ChangeVariable {
                name: name.to_owned(),
                scope,
                level,
                values,
            })
            .await
    }

    /// Ask the agent to evaluate a breakpoint condition given as a keyword
    /// call. The result arrives as `condition_result`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if no agent is connected, `AppError::Io`
    /// if the write fails.
    pub async fn evaluate_condition(&self, call: Vec<String>) -> Result<()> {
        let client = Self::attached(&self.lock())?;
        client.send(&ServerResponse::EvaluateCondition(call)).await
    }

    /// Evaluate `expression` in the paused agent. Waits until the previous
    /// evaluation got its result; this one's result arrives as
    /// `expression_result` with the same `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the agent is not paused, not connected,
    /// resumed or the session ended while waiting, `AppError::Io` if the
    /// write fails.
    pub async fn evaluate_expression(
        &self,
        id: u32,
        kind: ExpressionType,
        expression: &str,
    ) -> Result<()> {
        self.paused_client("evaluate an expression")?;

        let permit = Arc::clone(&self.evaluations)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Protocol("session ended before the expression was sent".into()))?;

        let client = {
            let mut state = self.lock();
            if !state.paused {
                return Err(AppError::Protocol(
                    "agent resumed before the expression was sent".into(),
                ));
            }
            let client = Self::attached(&state)?;
            state.evaluation = Some((id, permit));
            client
        };

        let sent = client
            .send(&ServerResponse::EvaluateExpression {
                id,
                kind,
                expression: expression.to_owned(),
            })
            .await;
        if sent.is_err() {
            self.lock().evaluation = None;
        }
        sent
    }

    async fn request(&self, request: PendingRequest) -> Result<()> {
        let client = {
            let mut state = self.lock();
            if !state.paused {
                state.pending = Some(request);
                debug!(?request, "controller: request queued");
                return Ok(());
            }
            Self::attached(&state)?
        };
        client.send(&request.response()).await
    }

    async fn answer_should_continue(&self, event: &ShouldContinueEvent) -> Result<()> {
        let pending = self.lock().pending.take();
        let response = pending.map_or(ServerResponse::Continue, PendingRequest::response);
        if pending.is_some() {
            info!(
                pausing_point = ?event.pausing_point,
                response = response.name(),
                "controller: delivering request"
            );
        }
        event.client.send(&response).await
    }

    fn paused_client(&self, action: &str) -> Result<Arc<AgentClient>> {
        let state = self.lock();
        if !state.paused {
            return Err(AppError::Protocol(format!(
                "cannot {action} while the agent is running"
            )));
        }
        Self::attached(&state)
    }

    fn attached(state: &ControlState) -> Result<Arc<AgentClient>> {
        state
            .client
            .clone()
            .ok_or_else(|| AppError::Protocol("no agent connected".into()))
    }

    fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEventListener for ProcessController {
    fn events_processing_about_to_start(&self, client: &Arc<AgentClient>) {
        self.lock().client = Some(Arc::clone(client));
    }

    fn handle_should_continue<'a>(
        &'a self,
        event: &'a ShouldContinueEvent,
    ) -> ListenerFuture<'a> {
        Box::pin(self.answer_should_continue(event))
    }

    fn handle_expression_evaluated<'a>(
        &'a self,
        event: &'a ExpressionEvaluatedEvent,
    ) -> ListenerFuture<'a> {
        let mut state = self.lock();
        if matches!(state.evaluation, Some((id, _)) if id == event.id) {
            state.evaluation = None;
        }
        done()
    }

    fn handle_paused(&self) -> ListenerFuture<'_> {
        self.set_paused(true);
        done()
    }

    fn handle_resumed(&self) -> ListenerFuture<'_> {
        let mut state = self.lock();
        state.paused = false;
        // A result can no longer arrive once the agent runs again.
        state.evaluation = None;
        done()
    }

    fn handle_closed(&self) -> ListenerFuture<'_> {
        self.set_paused(false);
        done()
    }

    fn events_processing_finished(&self) {
        self.evaluations.close();
        let mut state = self.lock();
        state.evaluation = None;
        state.paused = false;
        state.client = None;
    }
}

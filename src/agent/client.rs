//! Outbound half of an agent connection.
//!
//! [`AgentClient`] owns the write half of the socket. Every write goes
//! through one async mutex so frames from the dispatch loop and from the
//! asynchronous reply pool never interleave on the wire.
//!
//! Replies that take a while to compute (expression evaluation, remote
//! lookups) are handed to [`AgentClient::send_async`], which runs them on a
//! small bounded pool and always writes *something*: the computed response,
//! or the pre-supplied fallback when the computation fails.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::agent::codec::AgentCodec;
use crate::agent::response::ServerResponse;
use crate::Result;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Synchronised writer for one agent connection plus its reply pool.
pub struct AgentClient {
    id: u32,
    writer: Mutex<FramedWrite<BoxedWriter, AgentCodec>>,
    workers: Arc<Semaphore>,
    pending: TaskTracker,
    disposed: AtomicBool,
}

impl AgentClient {
    /// Wrap `writer` as the outbound channel of client `id`.
    ///
    /// `async_workers` bounds how many [`send_async`](Self::send_async)
    /// computations run at the same time.
    pub fn new<W>(id: u32, writer: W, async_workers: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            id,
            writer: Mutex::new(FramedWrite::new(boxed, AgentCodec::new())),
            workers: Arc::new(Semaphore::new(async_workers.max(1))),
            pending: TaskTracker::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Connection-derived identifier (the peer port for TCP clients).
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Serialise `response`, write it and flush, holding the write lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write or flush fails, or
    /// `AppError::Protocol` if the response cannot be serialised.
    pub async fn send(&self, response: &ServerResponse) -> Result<()> {
        let line = response.to_wire()?;
        let mut writer = self.writer.lock().await;
        writer.send(line).await.inspect_err(|e| {
            warn!(client_id = self.id, response = response.name(), error = %e, "agent client: write failed");
        })?;
        debug!(client_id = self.id, response = response.name(), "agent client: response sent");
        Ok(())
    }

    /// Compute a response on the reply pool and send it when ready.
    ///
    /// `task` runs in its own tokio task once a pool slot is free. If it
    /// returns `Err`, panics, or the pool was disposed before it could run,
    /// `fallback` is sent instead. The returned handle completes after the
    /// write attempt; write failures are logged, not returned.
    ///
    /// The built-in listeners answer with [`send`](Self::send); this entry
    /// point is for embedding listeners whose replies need outside work
    /// (a remote lookup, user input) without blocking the dispatch loop.
    pub fn send_async<F>(self: &Arc<Self>, task: F, fallback: ServerResponse) -> JoinHandle<()>
    where
        F: Future<Output = Result<ServerResponse>> + Send + 'static,
    {
        let client = Arc::clone(self);
        let workers = Arc::clone(&self.workers);

        self.pending.spawn(async move {
            let response = match workers.acquire_owned().await {
                Ok(permit) => {
                    let outcome = tokio::spawn(task).await;
                    drop(permit);
                    match outcome {
                        Ok(Ok(response)) => response,
                        Ok(Err(e)) => {
                            warn!(client_id = client.id, error = %e, "agent client: async reply failed, sending fallback");
                            fallback
                        }
                        Err(e) => {
                            warn!(client_id = client.id, error = %e, "agent client: async reply aborted, sending fallback");
                            fallback
                        }
                    }
                }
                Err(_) => {
                    debug!(client_id = client.id, "agent client: reply pool closed, sending fallback");
                    fallback
                }
            };

            if let Err(e) = client.send(&response).await {
                warn!(client_id = client.id, error = %e, "agent client: async reply not delivered");
            }
        })
    }

    /// Wait for every reply scheduled through [`send_async`](Self::send_async)
    /// to be written.
    pub async fn wait_for_pending(&self) {
        self.pending.close();
        self.pending.wait().await;
        if !self.is_disposed() {
            self.pending.reopen();
        }
    }

    /// Shut the reply pool down. Replies scheduled later go out as their
    /// fallback. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            debug!(client_id = self.id, "agent client: already disposed");
            return;
        }
        self.workers.close();
        self.pending.close();
        debug!(client_id = self.id, "agent client: disposed");
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

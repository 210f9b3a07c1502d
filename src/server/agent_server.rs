//! Single-shot agent server.
//!
//! [`AgentServer::start`] binds, accepts exactly one agent within the accept
//! timeout, runs the [`EventDispatcher`] over the connection and returns when
//! the loop ends. It never accepts a second connection; start a new server
//! for a new agent.
//!
//! # Lifecycle
//!
//! ```text
//! bind ──► server_established ──► accept ──► client_connected ──► loop ──► client_connection_closed
//!   │                               │                               │
//!   └─► client_connection_error     └─► client_connection_timed_out └─► client_connection_error (Io)
//!                                                                       client_event_handling_error (Protocol)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::client::AgentClient;
use crate::agent::dispatcher::EventDispatcher;
use crate::agent::listener::ExecutionEventListener;
use crate::config::ServerConfig;
use crate::server::status::ServerStatusListener;
use crate::{AppError, Result};

/// Accepts one agent and drives its event stream.
pub struct AgentServer {
    config: ServerConfig,
    status_listeners: Vec<Arc<dyn ServerStatusListener>>,
    ready: watch::Sender<Option<Result<SocketAddr>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl AgentServer {
    /// Create a server for `config`. Nothing is bound until [`start`](Self::start).
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let (ready, _) = watch::channel(None);
        Self {
            config,
            status_listeners: Vec::new(),
            ready,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Register a lifecycle observer. Observers are notified in
    /// registration order.
    pub fn add_status_listener(&mut self, listener: Arc<dyn ServerStatusListener>) {
        self.status_listeners.push(listener);
    }

    /// Configuration the server was created with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind, accept one agent and run the dispatch loop to completion.
    ///
    /// Returns `Ok(())` when the loop ends normally or when
    /// [`stop`](Self::stop) is called before an agent connects.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if binding, accepting or reading fails.
    /// - `AppError::Timeout` if no agent connects within the accept timeout.
    /// - `AppError::Protocol` if a listener aborts the loop, or if the
    ///   server was already started.
    pub async fn start(&self, listeners: Vec<Arc<dyn ExecutionEventListener>>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(AppError::Protocol("agent server was already started".into()));
        }
        if self.shutdown.is_cancelled() {
            debug!("agent server: stopped before start");
            return Ok(());
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(host = self.config.host.as_str(), port = self.config.port, error = %e, "agent server: bind failed");
                self.publish_setup(Err(e.clone()));
                self.notify(|s| s.client_connection_error(&e));
                return Err(e);
            }
        };

        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                let e = AppError::Io(format!("cannot resolve listening address: {e}"));
                self.publish_setup(Err(e.clone()));
                self.notify(|s| s.client_connection_error(&e));
                return Err(e);
            }
        };

        self.publish_setup(Ok(local));
        self.notify(|s| s.server_established(&self.config.host, local.port()));
        info!(%local, "agent server: waiting for agent");

        let accept = async {
            match self.config.accept_timeout() {
                Some(timeout) => tokio::time::timeout(timeout, listener.accept()).await,
                None => Ok(listener.accept().await),
            }
        };

        let accepted = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => {
                info!("agent server: stopped before an agent connected");
                return Ok(());
            }

            result = accept => result,
        };

        // Single client: nobody else may connect from here on.
        drop(listener);

        let (stream, peer) = match accepted {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                let e = AppError::Io(format!("accept failed: {e}"));
                self.notify(|s| s.client_connection_error(&e));
                return Err(e);
            }
            Err(_) => {
                let e = AppError::Timeout(format!(
                    "no agent connected within {} ms",
                    self.config.accept_timeout_ms
                ));
                self.notify(|s| s.client_connection_timed_out(&e));
                return Err(e);
            }
        };

        self.serve(stream, peer, listeners).await
    }

    /// Stop waiting for an agent. Safe to call repeatedly and from any task.
    ///
    /// A running dispatch loop is not interrupted; it ends with the
    /// connection or when its listeners stop handling events.
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.publish_setup(Err(AppError::Io(
            "agent server stopped before listening".into(),
        )));
        debug!("agent server: stop requested");
    }

    /// Wait until the server listens and return its bound address.
    ///
    /// # Errors
    ///
    /// Returns the setup error if binding failed, or `AppError::Io` if the
    /// server was stopped before it started listening.
    pub async fn wait_for_server_to_setup(&self) -> Result<SocketAddr> {
        let mut rx = self.ready.subscribe();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AppError::Io("agent server dropped during setup".into()))?;
        match &*state {
            Some(outcome) => outcome.clone(),
            None => Err(AppError::Io("agent server setup state missing".into())),
        }
    }

    async fn bind(&self) -> Result<TcpListener> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| AppError::Io(format!("cannot resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| AppError::Io(format!("no address for {host}:{port}")))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }?;
        socket.set_reuseaddr(true)?;
        socket
            .bind(addr)
            .map_err(|e| AppError::Io(format!("cannot bind {addr}: {e}")))?;
        Ok(socket.listen(1)?)
    }

    async fn serve(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        listeners: Vec<Arc<dyn ExecutionEventListener>>,
    ) -> Result<()> {
        let client_id = u32::from(peer.port());
        let (read_half, write_half) = stream.into_split();
        let client = Arc::new(AgentClient::new(
            client_id,
            write_half,
            self.config.async_workers,
        ));

        info!(client_id, %peer, "agent server: agent connected");
        self.notify(|s| s.client_connected(client_id));

        let dispatcher = EventDispatcher::new(Arc::clone(&client), listeners)
            .with_max_frame_bytes(self.config.max_frame_bytes);
        let outcome = dispatcher.run_events_loop(read_half).await;

        match &outcome {
            Ok(()) => {}
            Err(e) if e.is_protocol_fatal() => self.notify(|s| s.client_event_handling_error(e)),
            Err(e) => self.notify(|s| s.client_connection_error(e)),
        }
        self.notify(|s| s.client_connection_closed(client_id));
        client.dispose();

        info!(client_id, "agent server: session finished");
        outcome
    }

    fn publish_setup(&self, state: Result<SocketAddr>) {
        self.ready.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(state);
            true
        });
    }

    fn notify(&self, f: impl Fn(&dyn ServerStatusListener)) {
        for listener in &self.status_listeners {
            f(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for AgentServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentServer")
            .field("config", &self.config)
            .field("status_listeners", &self.status_listeners.len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

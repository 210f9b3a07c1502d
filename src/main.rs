#![forbid(unsafe_code)]

//! `robot-agent-server`: waits for one test agent and reports its run.
//!
//! Loads configuration, binds the agent server, lets the agent start as
//! soon as the server listens, and logs the execution until the agent
//! closes the connection or the process receives Ctrl-C / SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use robot_agent_server::agent::listener::ExecutionEventListener;
use robot_agent_server::agent::response::ExecutionMode;
use robot_agent_server::listeners::{
    EventLogger, MinimumRuntimePolicy, PidReader, TestsStarter, VersionCheckListener,
};
use robot_agent_server::server::{AgentServer, TracingStatusListener};
use robot_agent_server::{AppError, Result, ServerConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Run,
    Debug,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Run => Self::Run,
            ModeArg::Debug => Self::Debug,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "robot-agent-server", about = "Test agent execution protocol server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// How long to wait for the agent to connect, in milliseconds (0 waits indefinitely).
    #[arg(long)]
    accept_timeout_ms: Option<u64>,

    /// Execution mode announced to the agent.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("robot-agent-server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => ServerConfig::load_from_path(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(accept_timeout_ms) = args.accept_timeout_ms {
        config.accept_timeout_ms = accept_timeout_ms;
    }
    if let Some(mode) = args.mode {
        config.start.mode = mode.into();
    }
    config.validate()?;
    info!(host = config.host.as_str(), port = config.port, mode = config.start.mode.as_str(), "configuration loaded");

    // ── Compose listeners ───────────────────────────────
    let version_check: Arc<dyn ExecutionEventListener> = match config.min_runtime_version()? {
        Some(minimum) => Arc::new(VersionCheckListener::new(MinimumRuntimePolicy::new(
            config.protocol_version,
            minimum,
        ))),
        None => Arc::new(VersionCheckListener::for_protocol(config.protocol_version)),
    };
    let starter = Arc::new(
        TestsStarter::new(config.start.mode).with_start_timeout(config.start_timeout()),
    );
    let pid_reader = Arc::new(PidReader::new());
    let listeners: Vec<Arc<dyn ExecutionEventListener>> = vec![
        version_check,
        Arc::clone(&starter) as Arc<dyn ExecutionEventListener>,
        Arc::clone(&pid_reader) as Arc<dyn ExecutionEventListener>,
        Arc::new(EventLogger::new()),
    ];

    let mut server = AgentServer::new(config);
    server.add_status_listener(Arc::new(TracingStatusListener));
    let server = Arc::new(server);

    // ── Allow start once listening ──────────────────────
    let setup_server = Arc::clone(&server);
    let setup_starter = Arc::clone(&starter);
    tokio::spawn(async move {
        match setup_server.wait_for_server_to_setup().await {
            Ok(addr) => {
                info!(%addr, "agent may connect");
                setup_starter.allow_client_tests_start();
            }
            Err(err) => warn!(%err, "agent server did not start listening"),
        }
    });

    // ── Serve until the agent leaves or a signal arrives ─
    let serve_server = Arc::clone(&server);
    let mut serve = tokio::spawn(async move { serve_server.start(listeners).await });

    tokio::select! {
        joined = &mut serve => {
            let outcome = joined.map_err(|err| AppError::Io(format!("server task failed: {err}")))?;
            info!(pid = pid_reader.pid(), "agent session ended");
            outcome
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
            server.stop();
            starter.interrupt();
            serve.abort();
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

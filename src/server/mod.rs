//! TCP server accepting a single agent connection.

pub mod agent_server;
pub mod status;

pub use agent_server::AgentServer;
pub use status::{ServerStatusListener, TracingStatusListener};

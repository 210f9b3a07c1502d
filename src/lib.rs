#![forbid(unsafe_code)]

//! Server side of the test agent execution protocol.
//!
//! A running test process (the agent) connects over TCP and streams
//! newline-delimited JSON lifecycle events. The [`server::AgentServer`]
//! accepts exactly one agent, the [`agent::dispatcher::EventDispatcher`]
//! fans every event out to the registered
//! [`agent::listener::ExecutionEventListener`]s, and listeners answer
//! through the connection's [`agent::client::AgentClient`].

pub mod agent;
pub mod config;
pub mod errors;
pub mod listeners;
pub mod server;

pub use config::ServerConfig;
pub use errors::{AppError, Result};

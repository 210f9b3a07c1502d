//! Agent connection: framing, decoding, events, listeners and dispatch.
//!
//! Data flows one way through this module: [`codec`] splits the inbound
//! byte stream into lines, [`decoder`] turns each line into an
//! [`decoder::AgentMessage`], and [`dispatcher`] wraps it into a typed
//! [`event`] and hands it to every [`listener`]. Listeners answer through
//! [`client::AgentClient`] using the commands in [`response`].

pub mod client;
pub mod codec;
pub mod decoder;
pub mod dispatcher;
pub mod event;
pub mod listener;
pub mod response;

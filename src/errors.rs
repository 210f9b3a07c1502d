//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the agent protocol.
///
/// Transport failures (`Io`, `Timeout`) end a server instance and are
/// reported as connection errors. `Protocol` is the protocol-fatal category:
/// raised by a listener it aborts the dispatch loop and is reported as an
/// event handling error. `Codec` marks a single bad frame and is recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Socket or stream I/O failure.
    Io(String),
    /// Frame-level decoding failure (e.g. an over-long line).
    Codec(String),
    /// Protocol violation that must terminate the session.
    Protocol(String),
    /// A bounded wait elapsed.
    Timeout(String),
}

impl AppError {
    /// Whether the error necessarily terminates the dispatch loop as a
    /// protocol violation (as opposed to a transport failure).
    #[must_use]
    pub fn is_protocol_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

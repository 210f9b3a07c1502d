//! Ready-made listeners composed by callers of the server.
//!
//! None of them is installed implicitly; pass the ones a session needs to
//! [`crate::server::AgentServer::start`].

pub mod controller;
pub mod event_logger;
pub mod keep_alive;
pub mod pid_reader;
pub mod tests_starter;
pub mod version_check;

pub use controller::ProcessController;
pub use event_logger::EventLogger;
pub use keep_alive::KeepAliveListener;
pub use pid_reader::PidReader;
pub use tests_starter::TestsStarter;
pub use version_check::{
    CheckState, CompatibilityPolicy, MinimumRuntimePolicy, ProtocolVersionPolicy, RuntimeVersion,
    VersionCheckListener,
};

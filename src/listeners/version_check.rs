//! Protocol and runtime version gate.
//!
//! The agent reports its versions once, right after the operating mode is
//! negotiated. [`VersionCheckListener`] answers with a `protocol_version`
//! verdict and aborts the session when the agent is incompatible.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;
use tracing::{info, warn};

use crate::agent::event::{AgentVersions, VersionsEvent};
use crate::agent::listener::{ExecutionEventListener, ListenerFuture};
use crate::agent::response::ServerResponse;
use crate::{AppError, Result};

static VERSION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").ok());

/// A `major.minor[.patch]` runtime version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component; 0 when absent.
    pub patch: u32,
}

impl RuntimeVersion {
    /// Create a version from its components.
    #[must_use]
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first `major.minor[.patch]` group from `raw`.
    ///
    /// Accepts decorated strings such as `"Robot Framework 3.0.2 (Python 2.7)"`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = VERSION_PATTERN.as_ref()?.captures(raw)?;
        let component = |i: usize| -> Option<u32> {
            captures.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
        };
        Some(Self::new(component(1)?, component(2)?, component(3)?))
    }
}

impl PartialOrd for RuntimeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RuntimeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl Display for RuntimeVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Decides whether an agent may proceed.
pub trait CompatibilityPolicy: Send + Sync {
    /// `Ok(())` to accept, `Err(description)` to reject.
    ///
    /// # Errors
    ///
    /// Returns a human-readable mismatch description when rejecting.
    fn check(&self, versions: &AgentVersions) -> std::result::Result<(), String>;
}

/// Accepts agents speaking exactly the expected protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersionPolicy {
    expected: u32,
}

impl ProtocolVersionPolicy {
    /// Require protocol version `expected`.
    #[must_use]
    pub fn new(expected: u32) -> Self {
        Self { expected }
    }

    /// Required protocol version.
    #[must_use]
    pub fn expected(&self) -> u32 {
        self.expected
    }
}

impl CompatibilityPolicy for ProtocolVersionPolicy {
    fn check(&self, versions: &AgentVersions) -> std::result::Result<(), String> {
        if versions.protocol == self.expected {
            Ok(())
        } else {
            Err(format!(
                "server and agent protocol versions do not match: expected version {}, but agent reported version {}",
                self.expected, versions.protocol
            ))
        }
    }
}

/// Protocol check plus a lower bound on the runtime version.
///
/// Debug sessions depend on runtime features that older releases lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumRuntimePolicy {
    protocol: ProtocolVersionPolicy,
    minimum: RuntimeVersion,
}

impl MinimumRuntimePolicy {
    /// Require protocol version `expected` and a runtime of at least `minimum`.
    #[must_use]
    pub fn new(expected: u32, minimum: RuntimeVersion) -> Self {
        Self {
            protocol: ProtocolVersionPolicy::new(expected),
            minimum,
        }
    }
}

impl CompatibilityPolicy for MinimumRuntimePolicy {
    fn check(&self, versions: &AgentVersions) -> std::result::Result<(), String> {
        self.protocol.check(versions)?;
        match RuntimeVersion::parse(&versions.robot) {
            Some(actual) if actual >= self.minimum => Ok(()),
            Some(actual) => Err(format!(
                "runtime version {actual} is older than the required {}",
                self.minimum
            )),
            None => Err(format!(
                "cannot read runtime version from '{}'; at least {} is required",
                versions.robot, self.minimum
            )),
        }
    }
}

/// Outcome of the version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckState {
    /// No versions received yet.
    Checking,
    /// The agent was accepted.
    Accepted,
    /// The agent was rejected with this description.
    Rejected(String),
}

/// Answers `version` with a verdict and fails the session on rejection.
#[derive(Debug)]
pub struct VersionCheckListener<P = ProtocolVersionPolicy> {
    policy: P,
    state: Mutex<CheckState>,
}

impl VersionCheckListener<ProtocolVersionPolicy> {
    /// Listener requiring protocol version `expected`.
    #[must_use]
    pub fn for_protocol(expected: u32) -> Self {
        Self::new(ProtocolVersionPolicy::new(expected))
    }
}

impl<P: CompatibilityPolicy> VersionCheckListener<P> {
    /// Listener applying `policy`.
    #[must_use]
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            state: Mutex::new(CheckState::Checking),
        }
    }

    /// Current state of the check.
    #[must_use]
    pub fn state(&self) -> CheckState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolve(&self, state: CheckState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn check_versions(&self, event: &VersionsEvent) -> Result<()> {
        let client_id = event.client.id();
        match self.policy.check(&event.versions) {
            Ok(()) => {
                info!(
                    client_id,
                    protocol = event.versions.protocol,
                    runtime = event.versions.robot.as_str(),
                    "version check: agent accepted"
                );
                event
                    .client
                    .send(&ServerResponse::ProtocolVersion {
                        is_correct: true,
                        error: String::new(),
                    })
                    .await?;
                self.resolve(CheckState::Accepted);
                Ok(())
            }
            Err(description) => {
                warn!(client_id, error = description.as_str(), "version check: agent rejected");
                self.resolve(CheckState::Rejected(description.clone()));
                event
                    .client
                    .send(&ServerResponse::ProtocolVersion {
                        is_correct: false,
                        error: description.clone(),
                    })
                    .await?;
                Err(AppError::Protocol(description))
            }
        }
    }
}

impl<P: CompatibilityPolicy> ExecutionEventListener for VersionCheckListener<P> {
    fn handle_versions<'a>(&'a self, event: &'a VersionsEvent) -> ListenerFuture<'a> {
        Box::pin(self.check_versions(event))
    }
}

//! Typed events reported by the agent.
//!
//! One immutable value is built per inbound frame and dropped once every
//! listener has seen it. Events the server must answer directly
//! (initialisation, versions, start and pause queries) carry the
//! [`AgentClient`] of the connection they arrived on.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::agent::client::AgentClient;

/// Outcome of a suite or test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Status {
    /// Passed.
    #[serde(rename = "PASS")]
    Pass,
    /// Failed.
    #[serde(rename = "FAIL")]
    Fail,
    /// Not executed.
    #[serde(rename = "NOT RUN", alias = "NOT_RUN")]
    NotRun,
    /// Skipped.
    #[serde(rename = "SKIP")]
    Skip,
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Most verbose level.
    Trace,
    /// Debug output.
    Debug,
    /// Informational output.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Keyword failure message.
    Fail,
    /// Message containing HTML.
    Html,
    /// Logging disabled.
    None,
}

impl LogLevel {
    /// Parse a level name case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let level = match raw.to_ascii_uppercase().as_str() {
            "TRACE" => Self::Trace,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "WARN" => Self::Warn,
            "ERROR" => Self::Error,
            "FAIL" => Self::Fail,
            "HTML" => Self::Html,
            "NONE" => Self::None,
            _ => return None,
        };
        Some(level)
    }
}

/// Point of keyword execution at which the agent asks whether to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PausingPoint {
    /// Before a keyword starts (debug mode only).
    PreStartKeyword,
    /// Right after a keyword started.
    StartKeyword,
    /// Before a keyword ends (debug mode only).
    PreEndKeyword,
    /// Right after a keyword ended.
    EndKeyword,
}

/// Which keyword notification an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordPhase {
    /// `pre_start_keyword`
    AboutToStart,
    /// `start_keyword`
    Started,
    /// `pre_end_keyword`
    AboutToEnd,
    /// `end_keyword`
    Ended,
}

/// Runtime and protocol versions reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentVersions {
    /// Command line the test process was started with.
    pub cmd_line: String,
    /// Interpreter version string.
    pub python: String,
    /// Test runtime version string.
    pub robot: String,
    /// Agent protocol version.
    pub protocol: u32,
    /// Process id of the test process, when reported.
    pub pid: Option<i64>,
}

/// The agent connected and waits for its operating mode.
#[derive(Debug, Clone)]
pub struct AgentInitializingEvent {
    /// Connection to answer on.
    pub client: Arc<AgentClient>,
}

/// The agent reported its versions and waits for a verdict.
#[derive(Debug, Clone)]
pub struct VersionsEvent {
    /// Connection to answer on.
    pub client: Arc<AgentClient>,
    /// Reported versions.
    pub versions: AgentVersions,
}

/// The agent is held before running any test content.
#[derive(Debug, Clone)]
pub struct ReadyToStartEvent {
    /// Connection to answer on.
    pub client: Arc<AgentClient>,
}

/// The agent asks whether to continue at a pausing point.
#[derive(Debug, Clone)]
pub struct ShouldContinueEvent {
    /// Connection to answer on.
    pub client: Arc<AgentClient>,
    /// Where execution currently stands.
    pub pausing_point: PausingPoint,
}

/// A resource file was imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceImportEvent {
    /// Resource name.
    pub name: String,
    /// Resource file path.
    pub source: Option<PathBuf>,
}

/// A library was imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryImportEvent {
    /// Library name as written by the user.
    pub name: String,
    /// File that imported the library.
    pub importer: Option<PathBuf>,
    /// Library source file.
    pub source: Option<PathBuf>,
    /// Import arguments.
    pub args: Vec<String>,
}

/// A suite started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteStartedEvent {
    /// Suite name.
    pub name: String,
    /// Suite file or directory.
    pub source: Option<PathBuf>,
    /// Whether `source` is a directory.
    pub is_dir: bool,
    /// Number of tests in the suite and its children.
    pub total_tests: u32,
    /// Names of direct child suites.
    pub child_suites: Vec<String>,
    /// Names of direct child tests.
    pub child_tests: Vec<String>,
}

/// A suite ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteEndedEvent {
    /// Suite name.
    pub name: String,
    /// Elapsed time in milliseconds.
    pub elapsed_time: u64,
    /// Suite outcome.
    pub status: Status,
    /// Failure message, if any.
    pub error_message: Option<String>,
}

/// A test started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStartedEvent {
    /// Test name.
    pub name: String,
    /// Fully qualified test name.
    pub long_name: String,
}

/// A test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEndedEvent {
    /// Test name.
    pub name: String,
    /// Fully qualified test name.
    pub long_name: String,
    /// Elapsed time in milliseconds.
    pub elapsed_time: u64,
    /// Test outcome.
    pub status: Status,
    /// Failure message, if any.
    pub error_message: Option<String>,
}

/// A keyword is about to start, started, is about to end or ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordEvent {
    /// Which notification this is.
    pub phase: KeywordPhase,
    /// Full keyword name.
    pub name: String,
    /// Keyword type (`Keyword`, `Setup`, `For`, ...).
    pub keyword_type: String,
    /// Library or resource defining the keyword.
    pub library: Option<String>,
}

/// Snapshot of variables, one ordered map per stack frame scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablesEvent {
    /// Variable scopes, innermost first, in agent order.
    pub scopes: Vec<Map<String, Value>>,
    /// Error raised while changing a variable, if any.
    pub error: Option<String>,
}

/// Result of a breakpoint condition evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionEvaluatedEvent {
    /// Condition value, or the evaluation error.
    pub outcome: std::result::Result<bool, String>,
}

impl ConditionEvaluatedEvent {
    /// Condition value when evaluation succeeded.
    #[must_use]
    pub fn result(&self) -> Option<bool> {
        self.outcome.as_ref().ok().copied()
    }

    /// Evaluation error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

/// Result of an `evaluate_expression` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionEvaluatedEvent {
    /// Correlation id of the request.
    pub id: u32,
    /// Rendered result.
    pub result: Option<String>,
    /// Evaluation error.
    pub error: Option<String>,
}

/// A message logged by a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessageEvent {
    /// Message text.
    pub message: String,
    /// Severity.
    pub level: LogLevel,
    /// Runtime timestamp, verbatim.
    pub timestamp: Option<String>,
}

/// A message from the runtime itself (syntax errors, warnings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Message text.
    pub message: String,
    /// Severity.
    pub level: LogLevel,
}

/// The output file was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileEvent {
    /// Output file path; absent when output is disabled.
    pub path: Option<PathBuf>,
}

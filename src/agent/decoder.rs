//! Inbound frame decoding.
//!
//! Each line is a JSON object whose first key names the event and whose value
//! is the argument list. Decoding is closed over the known event tags:
//! anything else becomes an explicit [`Skip`] so the dispatch loop can carry
//! on with the next frame.
//!
//! | Tag                  | Maps to                                   |
//! |----------------------|-------------------------------------------|
//! | `agent_initializing` | [`AgentMessage::AgentInitializing`]       |
//! | `version`            | [`AgentMessage::Versions`]                |
//! | `ready_to_start`     | [`AgentMessage::ReadyToStart`]            |
//! | `resource_import`    | [`AgentMessage::ResourceImport`]          |
//! | `library_import`     | [`AgentMessage::LibraryImport`]           |
//! | `start_suite`        | [`AgentMessage::SuiteStarted`]            |
//! | `end_suite`          | [`AgentMessage::SuiteEnded`]              |
//! | `start_test`         | [`AgentMessage::TestStarted`]             |
//! | `end_test`           | [`AgentMessage::TestEnded`]               |
//! | `pre_start_keyword`, `start_keyword`, `pre_end_keyword`, `end_keyword` | [`AgentMessage::Keyword`] |
//! | `variables`          | [`AgentMessage::Variables`]               |
//! | `should_continue`    | [`AgentMessage::ShouldContinue`]          |
//! | `condition_result`   | [`AgentMessage::ConditionEvaluated`]      |
//! | `expression_result`  | [`AgentMessage::ExpressionEvaluated`]     |
//! | `paused`, `resumed`, `close` | [`AgentMessage::Paused`], [`AgentMessage::Resumed`], [`AgentMessage::Closed`] |
//! | `log_message`, `message` | [`AgentMessage::LogMessage`], [`AgentMessage::Message`] |
//! | `output_file`        | [`AgentMessage::OutputFile`]              |
//! | *(any other)*        | [`Skip::Unknown`]                         |

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::agent::event::{
    AgentVersions, ConditionEvaluatedEvent, ExpressionEvaluatedEvent, KeywordEvent, KeywordPhase,
    LibraryImportEvent, LogLevel, LogMessageEvent, MessageEvent, OutputFileEvent, PausingPoint,
    ResourceImportEvent, Status, SuiteEndedEvent, SuiteStartedEvent, TestEndedEvent,
    TestStartedEvent, VariablesEvent,
};

/// A recognised inbound message, not yet bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    /// `agent_initializing`
    AgentInitializing,
    /// `version`
    Versions(AgentVersions),
    /// `ready_to_start`
    ReadyToStart,
    /// `resource_import`
    ResourceImport(ResourceImportEvent),
    /// `library_import`
    LibraryImport(LibraryImportEvent),
    /// `start_suite`
    SuiteStarted(SuiteStartedEvent),
    /// `end_suite`
    SuiteEnded(SuiteEndedEvent),
    /// `start_test`
    TestStarted(TestStartedEvent),
    /// `end_test`
    TestEnded(TestEndedEvent),
    /// Any of the four keyword notifications.
    Keyword(KeywordEvent),
    /// `variables`
    Variables(VariablesEvent),
    /// `should_continue`
    ShouldContinue(PausingPoint),
    /// `condition_result`
    ConditionEvaluated(ConditionEvaluatedEvent),
    /// `expression_result`
    ExpressionEvaluated(ExpressionEvaluatedEvent),
    /// `paused`
    Paused,
    /// `resumed`
    Resumed,
    /// `log_message`
    LogMessage(LogMessageEvent),
    /// `message`
    Message(MessageEvent),
    /// `output_file`
    OutputFile(OutputFileEvent),
    /// `close`
    Closed,
}

impl AgentMessage {
    /// Wire tag of the message.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AgentInitializing => "agent_initializing",
            Self::Versions(_) => "version",
            Self::ReadyToStart => "ready_to_start",
            Self::ResourceImport(_) => "resource_import",
            Self::LibraryImport(_) => "library_import",
            Self::SuiteStarted(_) => "start_suite",
            Self::SuiteEnded(_) => "end_suite",
            Self::TestStarted(_) => "start_test",
            Self::TestEnded(_) => "end_test",
            Self::Keyword(event) => match event.phase {
                KeywordPhase::AboutToStart => "pre_start_keyword",
                KeywordPhase::Started => "start_keyword",
                KeywordPhase::AboutToEnd => "pre_end_keyword",
                KeywordPhase::Ended => "end_keyword",
            },
            Self::Variables(_) => "variables",
            Self::ShouldContinue(_) => "should_continue",
            Self::ConditionEvaluated(_) => "condition_result",
            Self::ExpressionEvaluated(_) => "expression_result",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::LogMessage(_) => "log_message",
            Self::Message(_) => "message",
            Self::OutputFile(_) => "output_file",
            Self::Closed => "close",
        }
    }
}

/// Why a frame was not turned into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Empty or whitespace-only line.
    Blank,
    /// Not valid JSON.
    Malformed(String),
    /// Valid JSON but not an object (includes `null`).
    NotAnObject,
    /// An object without any key.
    Empty,
    /// Tag this server does not know.
    Unknown(String),
    /// Known tag whose arguments do not have the expected shape.
    InvalidPayload {
        /// Event tag.
        tag: String,
        /// What did not match.
        reason: String,
    },
}

impl Skip {
    /// Whether the frame must end the session instead of being skipped.
    ///
    /// The agent blocks on the verdict to its `version` frame, so a
    /// handshake that cannot be decoded is a protocol violation.
    #[must_use]
    pub fn is_handshake_violation(&self) -> bool {
        matches!(self, Self::InvalidPayload { tag, .. } if tag == "version")
    }
}

/// Result of decoding one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A recognised message.
    Message(AgentMessage),
    /// A frame to be skipped.
    Skip(Skip),
}

/// Decode one inbound line.
#[must_use]
pub fn decode_line(line: &str) -> Decoded {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Decoded::Skip(Skip::Blank);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => return Decoded::Skip(Skip::Malformed(e.to_string())),
    };

    let Value::Object(map) = value else {
        return Decoded::Skip(Skip::NotAnObject);
    };

    let Some((tag, payload)) = map.into_iter().next() else {
        return Decoded::Skip(Skip::Empty);
    };

    let args = into_arguments(payload);
    match decode_message(&tag, &args) {
        Ok(Some(message)) => Decoded::Message(message),
        Ok(None) => Decoded::Skip(Skip::Unknown(tag)),
        Err(reason) => Decoded::Skip(Skip::InvalidPayload { tag, reason }),
    }
}

// ── Argument shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VersionAttributes {
    #[serde(default)]
    cmd_line: String,
    #[serde(default)]
    python: String,
    #[serde(default)]
    robot: String,
    protocol: u32,
    #[serde(default)]
    pid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SourceAttributes {
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LibraryAttributes {
    #[serde(default)]
    originalname: Option<String>,
    #[serde(default)]
    importer: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StartSuiteAttributes {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    totaltests: u32,
    #[serde(default)]
    suites: Vec<String>,
    #[serde(default)]
    tests: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EndAttributes {
    #[serde(default)]
    longname: String,
    #[serde(default)]
    elapsedtime: u64,
    status: Status,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartTestAttributes {
    #[serde(default)]
    longname: String,
}

#[derive(Debug, Deserialize)]
struct KeywordAttributes {
    #[serde(rename = "type", default)]
    keyword_type: String,
    #[serde(default)]
    libname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VariablesAttributes {
    #[serde(default)]
    var_scopes: Vec<Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShouldContinueAttributes {
    pausing_point: PausingPoint,
}

#[derive(Debug, Deserialize)]
struct ConditionAttributes {
    #[serde(default)]
    result: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpressionAttributes {
    id: u32,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageAttributes {
    message: String,
    level: String,
    #[serde(default)]
    timestamp: Option<String>,
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// The argument list of a frame; a lone non-array value is one argument.
fn into_arguments(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(args) => args,
        other => vec![other],
    }
}

fn argument<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, String> {
    let value = args
        .get(index)
        .cloned()
        .ok_or_else(|| format!("missing argument #{index}"))?;
    serde_json::from_value(value).map_err(|e| format!("argument #{index}: {e}"))
}

fn level(raw: &str) -> Result<LogLevel, String> {
    LogLevel::parse(raw).ok_or_else(|| format!("unknown log level '{raw}'"))
}

fn decode_message(tag: &str, args: &[Value]) -> Result<Option<AgentMessage>, String> {
    let message = match tag {
        "agent_initializing" => AgentMessage::AgentInitializing,
        "ready_to_start" => AgentMessage::ReadyToStart,
        "paused" => AgentMessage::Paused,
        "resumed" => AgentMessage::Resumed,
        "close" => AgentMessage::Closed,
        "version" => {
            let attrs: VersionAttributes = argument(args, 0)?;
            AgentMessage::Versions(AgentVersions {
                cmd_line: attrs.cmd_line,
                python: attrs.python,
                robot: attrs.robot,
                protocol: attrs.protocol,
                pid: attrs.pid,
            })
        }
        "resource_import" => {
            let name: String = argument(args, 0)?;
            let attrs: SourceAttributes = argument(args, 1)?;
            AgentMessage::ResourceImport(ResourceImportEvent {
                name,
                source: attrs.source.map(PathBuf::from),
            })
        }
        "library_import" => {
            let name: String = argument(args, 0)?;
            let attrs: LibraryAttributes = argument(args, 1)?;
            let name = attrs.originalname.filter(|n| !n.is_empty()).unwrap_or(name);
            AgentMessage::LibraryImport(LibraryImportEvent {
                name,
                importer: attrs.importer.map(PathBuf::from),
                source: attrs.source.map(PathBuf::from),
                args: attrs.args,
            })
        }
        "start_suite" => {
            let name: String = argument(args, 0)?;
            let attrs: StartSuiteAttributes = argument(args, 1)?;
            AgentMessage::SuiteStarted(SuiteStartedEvent {
                name,
                source: attrs.source.map(PathBuf::from),
                is_dir: attrs.is_dir,
                total_tests: attrs.totaltests,
                child_suites: attrs.suites,
                child_tests: attrs.tests,
            })
        }
        "end_suite" => {
            let name: String = argument(args, 0)?;
            let attrs: EndAttributes = argument(args, 1)?;
            AgentMessage::SuiteEnded(SuiteEndedEvent {
                name,
                elapsed_time: attrs.elapsedtime,
                status: attrs.status,
                error_message: attrs.message.filter(|m| !m.is_empty()),
            })
        }
        "start_test" => {
            let name: String = argument(args, 0)?;
            let attrs: StartTestAttributes = argument(args, 1)?;
            AgentMessage::TestStarted(TestStartedEvent {
                name,
                long_name: attrs.longname,
            })
        }
        "end_test" => {
            let name: String = argument(args, 0)?;
            let attrs: EndAttributes = argument(args, 1)?;
            AgentMessage::TestEnded(TestEndedEvent {
                name,
                long_name: attrs.longname,
                elapsed_time: attrs.elapsedtime,
                status: attrs.status,
                error_message: attrs.message.filter(|m| !m.is_empty()),
            })
        }
        "pre_start_keyword" => keyword(KeywordPhase::AboutToStart, args)?,
        "start_keyword" => keyword(KeywordPhase::Started, args)?,
        "pre_end_keyword" => keyword(KeywordPhase::AboutToEnd, args)?,
        "end_keyword" => keyword(KeywordPhase::Ended, args)?,
        "variables" => {
            let attrs: VariablesAttributes = argument(args, 0)?;
            AgentMessage::Variables(VariablesEvent {
                scopes: attrs.var_scopes,
                error: attrs.error,
            })
        }
        "should_continue" => {
            let attrs: ShouldContinueAttributes = argument(args, 0)?;
            AgentMessage::ShouldContinue(attrs.pausing_point)
        }
        "condition_result" => {
            let attrs: ConditionAttributes = argument(args, 0)?;
            let outcome = match (attrs.result, attrs.error) {
                (_, Some(error)) => Err(error),
                (Some(result), None) => Ok(result),
                (None, None) => return Err("condition result without result or error".into()),
            };
            AgentMessage::ConditionEvaluated(ConditionEvaluatedEvent { outcome })
        }
        "expression_result" => {
            let attrs: ExpressionAttributes = argument(args, 0)?;
            AgentMessage::ExpressionEvaluated(ExpressionEvaluatedEvent {
                id: attrs.id,
                result: attrs.result,
                error: attrs.error,
            })
        }
        "log_message" => {
            let attrs: MessageAttributes = argument(args, 0)?;
            AgentMessage::LogMessage(LogMessageEvent {
                level: level(&attrs.level)?,
                message: attrs.message,
                timestamp: attrs.timestamp,
            })
        }
        "message" => {
            let attrs: MessageAttributes = argument(args, 0)?;
            AgentMessage::Message(MessageEvent {
                level: level(&attrs.level)?,
                message: attrs.message,
            })
        }
        "output_file" => {
            let path: Option<String> = argument(args, 0)?;
            AgentMessage::OutputFile(OutputFileEvent {
                path: path.map(PathBuf::from),
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

fn keyword(phase: KeywordPhase, args: &[Value]) -> Result<AgentMessage, String> {
    let name: String = argument(args, 0)?;
    let attrs: KeywordAttributes = argument(args, 1)?;
    Ok(AgentMessage::Keyword(KeywordEvent {
        phase,
        name,
        keyword_type: attrs.keyword_type,
        library: attrs.libname.filter(|l| !l.is_empty()),
    }))
}

//! Outbound commands sent from the server to the agent.
//!
//! Every response is a single-key JSON object on its own line. The key names
//! the command; argument-less commands carry an empty object:
//!
//! ```json
//! {"operating_mode":{"mode":"DEBUG","wait_for_start_allowance":true}}
//! {"protocol_version":{"is_correct":false,"error":"..."}}
//! {"do_start":{}}
//! {"evaluate_expression":{"id":3,"type":"robot","expr":"Log  hello"}}
//! ```

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{AppError, Result};

/// How the agent runs the suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Plain run; the agent only polls for pause requests occasionally.
    #[default]
    #[serde(alias = "RUN")]
    Run,
    /// Debug run; the agent asks before and after every keyword.
    #[serde(alias = "DEBUG")]
    Debug,
}

impl ExecutionMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "RUN",
            Self::Debug => "DEBUG",
        }
    }
}

/// Language of an expression evaluated inside a paused agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionType {
    /// A keyword call with arguments.
    Robot,
    /// A Python expression.
    Python,
    /// A variable lookup.
    Variable,
}

impl ExpressionType {
    /// Wire name of the expression type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Robot => "robot",
            Self::Python => "python",
            Self::Variable => "variable",
        }
    }
}

/// Scope a variable lives in when changing its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    /// Local to the current keyword.
    Local,
    /// Test case scope.
    TestCase,
    /// Suite scope.
    TestSuite,
    /// Global scope.
    Global,
}

impl VariableScope {
    /// Wire name of the scope.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::TestCase => "test_case",
            Self::TestSuite => "test_suite",
            Self::Global => "global",
        }
    }
}

/// A command written to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    /// Reply to `agent_initializing`.
    OperatingMode {
        /// Mode the agent should run in.
        mode: ExecutionMode,
        /// Whether the agent must wait for `do_start` after `ready_to_start`.
        wait_for_start_allowance: bool,
    },
    /// Verdict on the versions reported by the agent.
    ProtocolVersion {
        /// Whether the agent may proceed.
        is_correct: bool,
        /// Human-readable mismatch description; empty when accepted.
        error: String,
    },
    /// Lets a held agent start executing tests.
    DoStart,
    /// Answer to `should_continue`: keep running.
    Continue,
    /// Answer to `should_continue`: suspend at this point.
    Pause,
    /// Leave the paused state.
    Resume,
    /// Kill the test process.
    Terminate,
    /// Close the connection and keep running without a server.
    Disconnect,
    /// Evaluate a breakpoint condition given as keyword and arguments.
    EvaluateCondition(Vec<String>),
    /// Evaluate an expression; the result arrives as `expression_result`.
    EvaluateExpression {
        /// Correlation id echoed in the result event.
        id: u32,
        /// Expression language.
        kind: ExpressionType,
        /// Expression text.
        expression: String,
    },
    /// Change the value of a variable in a stack frame.
    ChangeVariable {
        /// Variable name.
        name: String,
        /// Scope holding the variable.
        scope: VariableScope,
        /// Stack frame level.
        level: u32,
        /// New value(s).
        values: Vec<String>,
    },
}

impl ServerResponse {
    /// Key under which the command travels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OperatingMode { .. } => "operating_mode",
            Self::ProtocolVersion { .. } => "protocol_version",
            Self::DoStart => "do_start",
            Self::Continue => "continue",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Terminate => "terminate",
            Self::Disconnect => "disconnect",
            Self::EvaluateCondition(_) => "evaluate_condition",
            Self::EvaluateExpression { .. } => "evaluate_expression",
            Self::ChangeVariable { .. } => "change_variable",
        }
    }

    /// JSON value of the command, including its key.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let arguments = match self {
            Self::OperatingMode {
                mode,
                wait_for_start_allowance,
            } => json!({
                "mode": mode.as_str(),
                "wait_for_start_allowance": wait_for_start_allowance,
            }),
            Self::ProtocolVersion { is_correct, error } => json!({
                "is_correct": is_correct,
                "error": error,
            }),
            Self::DoStart
            | Self::Continue
            | Self::Pause
            | Self::Resume
            | Self::Terminate
            | Self::Disconnect => json!({}),
            Self::EvaluateCondition(call) => json!(call),
            Self::EvaluateExpression {
                id,
                kind,
                expression,
            } => json!({
                "id": id,
                "type": kind.as_str(),
                "expr": expression,
            }),
            Self::ChangeVariable {
                name,
                scope,
                level,
                values,
            } => json!({
                "name": name,
                "scope": scope.as_str(),
                "level": level,
                "values": values,
            }),
        };

        let mut envelope = serde_json::Map::with_capacity(1);
        envelope.insert(self.name().to_owned(), arguments);
        Value::Object(envelope)
    }

    /// Compact single-line JSON form, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialisation fails.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(&self.to_value())
            .map_err(|e| AppError::Protocol(format!("failed to serialise {}: {e}", self.name())))
    }
}

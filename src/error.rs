use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Machine-readable codes carried by every surfaced runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EntryNotFound,
    NodeNotFound,
    SessionNotFound,
    SessionNotWaiting,
    MaxStepsExceeded,
    MaxRetriesExceeded,
    IntentNotFound,
    ToolCallFailed,
    ToolCallError,
    UnknownNodeType,
    ExecutionError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EntryNotFound => "ENTRY_NOT_FOUND",
            ErrorCode::NodeNotFound => "NODE_NOT_FOUND",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionNotWaiting => "SESSION_NOT_WAITING",
            ErrorCode::MaxStepsExceeded => "MAX_STEPS_EXCEEDED",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::IntentNotFound => "INTENT_NOT_FOUND",
            ErrorCode::ToolCallFailed => "TOOL_CALL_FAILED",
            ErrorCode::ToolCallError => "TOOL_CALL_ERROR",
            ErrorCode::UnknownNodeType => "UNKNOWN_NODE_TYPE",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded in an execution step or carried by a node result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors that cross the public engine surface. Everything else is reported
/// in-band through the session (`status = error` plus the last step's error).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("entry node `{0}` does not exist in the flow")]
    EntryNotFound(String),
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("session `{0}` is not waiting for input")]
    SessionNotWaiting(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::EntryNotFound(_) => ErrorCode::EntryNotFound,
            EngineError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            EngineError::SessionNotWaiting(_) => ErrorCode::SessionNotWaiting,
        }
    }
}

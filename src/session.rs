use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorBody;
use crate::flow::Flow;

/// Lifecycle state of a session. Everything outside `Active` and
/// `WaitingInput` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    WaitingInput,
    Completed,
    Escalated,
    Abandoned,
    Error,
    Timeout,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active | SessionStatus::WaitingInput)
    }
}

/// One handler invocation in a session's audit history.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub step_id: String,
    pub node_id: String,
    pub node_kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Wall-clock duration in integer milliseconds.
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ExecutionStep {
    pub fn new(node_id: impl Into<String>, node_kind: impl Into<String>) -> Self {
        Self {
            step_id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            node_kind: node_kind.into(),
            timestamp: Utc::now(),
            input: None,
            output: None,
            duration: 0,
            error: None,
        }
    }
}

/// Durable execution state of one user's progress through a flow. This is
/// the whole continuation: the next turn needs nothing beyond
/// `current_node_id`, `variables` and `status`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub flow_id: String,
    pub current_node_id: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub history: Vec<ExecutionStep>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Session {
    /// Fresh session positioned at the flow's entry node, with variables
    /// seeded from the flow's declarations.
    pub fn new(flow: &Flow) -> Self {
        let mut variables = HashMap::new();
        for decl in &flow.variables {
            if let Some(default) = &decl.default_value {
                variables.insert(decl.name.clone(), default.clone());
            }
        }
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            flow_id: flow.id.clone(),
            current_node_id: flow.entry_node.clone(),
            variables,
            history: Vec::new(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Shallow overwrite keyed by name; nested objects are replaced whole.
    pub fn apply_variables(&mut self, patch: HashMap<String, Value>) {
        for (name, value) in patch {
            self.variables.insert(name, value);
        }
    }

    /// History is append-only; steps are never rewritten after this.
    pub fn push_step(&mut self, step: ExecutionStep) {
        self.history.push(step);
        self.touch();
    }

    pub fn last_error(&self) -> Option<&ErrorBody> {
        self.history.last().and_then(|s| s.error.as_ref())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::value::ConditionOperator;

/// The only wire version the runtime accepts.
pub const FLOW_VERSION: &str = "1.0";

const NODE_TYPES: &[&str] = &[
    "start",
    "message",
    "collect_input",
    "llm_router",
    "knowledge_search",
    "tool_call",
    "condition",
    "escalate",
    "end",
];

/// A declarative conversational flow: a typed node graph plus variable and
/// tool declarations. Immutable while sessions run against it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub version: String,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Id of the node `start_session` begins at.
    pub entry_node: String,
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FlowMetadata>,

    #[serde(skip)]
    #[schemars(skip)]
    node_index: HashMap<String, usize>,
    #[serde(skip)]
    #[schemars(skip)]
    outgoing: HashMap<String, Vec<usize>>,
}

impl Flow {
    /// Builds the id → node and source → edges indexes. Must be called once
    /// after deserialisation; `from_json` and the registry do this for you.
    pub fn build(mut self) -> Self {
        let mut node_index = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            node_index.insert(node.id.clone(), i);
        }
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in self.edges.iter().enumerate() {
            outgoing.entry(edge.source.clone()).or_default().push(i);
        }
        self.node_index = node_index;
        self.outgoing = outgoing;
        self
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.node_index.get(id).map(|i| &self.nodes[*i])
    }

    /// Outgoing edges of a node in declaration order.
    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.outgoing
            .get(id)
            .map(|ixs| ixs.iter().map(|i| &self.edges[*i]).collect())
            .unwrap_or_default()
    }

    /// Parses and indexes a flow document, rejecting unsupported versions
    /// and unknown node types before the typed decode.
    pub fn from_json(json: &str) -> Result<Flow, FlowError> {
        let raw: Value = serde_json::from_str(json)?;

        let version = raw.get("version").and_then(Value::as_str).unwrap_or("");
        if version != FLOW_VERSION {
            return Err(FlowError::UnsupportedVersion(version.to_string()));
        }
        if let Some(nodes) = raw.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                let kind = node.get("type").and_then(Value::as_str).unwrap_or("");
                if !NODE_TYPES.contains(&kind) {
                    return Err(FlowError::UnknownNodeType {
                        node_id: node
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or("?")
                            .to_string(),
                        node_type: kind.to_string(),
                    });
                }
            }
        }

        let flow: Flow = serde_json::from_value(raw)?;
        Ok(flow.build())
    }
}

/// One node of the graph. The per-kind payload lives under `config`,
/// discriminated by the wire field `type`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum NodeKind {
    Start(StartConfig),
    Message(MessageConfig),
    CollectInput(CollectInputConfig),
    LlmRouter(LlmRouterConfig),
    KnowledgeSearch(KnowledgeSearchConfig),
    ToolCall(ToolCallConfig),
    Condition(ConditionConfig),
    Escalate(EscalateConfig),
    End(EndConfig),
}

impl NodeKind {
    /// The wire discriminator, also recorded in execution steps.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Start(_) => "start",
            NodeKind::Message(_) => "message",
            NodeKind::CollectInput(_) => "collect_input",
            NodeKind::LlmRouter(_) => "llm_router",
            NodeKind::KnowledgeSearch(_) => "knowledge_search",
            NodeKind::ToolCall(_) => "tool_call",
            NodeKind::Condition(_) => "condition",
            NodeKind::Escalate(_) => "escalate",
            NodeKind::End(_) => "end",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_variables: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfig {
    /// Template text; `{{name}}` tokens are interpolated at run time.
    pub message: String,
    /// Optional artificial delay in milliseconds before the text is emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectInputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Session variable the validated input is written to.
    pub variable_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<InputTimeout>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    #[serde(rename = "type")]
    pub kind: ValidationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Text,
    Number,
    Email,
    Phone,
    Regex,
    Date,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPrompt {
    pub max_attempts: u32,
    pub retry_message: String,
}

/// Input deadline policy. The runtime does not poll; the seconds are a
/// contract for the outer caller, which may deliver a timeout signal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InputTimeout {
    pub seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlmRouterConfig {
    pub system_prompt: String,
    pub intents: Vec<IntentRoute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    /// Intent name routed to when classification is unusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntentRoute {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
    pub target_node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchConfig {
    pub knowledge_base_id: String,
    /// Query template interpolated against session variables.
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    pub result_variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounded_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallConfig {
    pub tool_id: String,
    /// Key → literal or template. String values are interpolated.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    pub result_variable: String,
    /// Per-call deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<ToolRetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolRetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnError {
    pub action: OnErrorAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorAction {
    Continue,
    Retry,
    Escalate,
    Goto,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    pub conditions: Vec<ConditionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    pub id: String,
    /// Dotted path into session variables, e.g. `order.status`.
    pub variable: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    pub target_node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EscalateConfig {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Extra handoff context; values are templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub status: EndStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    #[default]
    Completed,
    Escalated,
    Abandoned,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Declaration of a tool a Tool-Call node may invoke via `toolId`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecl {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("flow document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported flow version `{0}` (expected \"1.0\")")]
    UnsupportedVersion(String),
    #[error("node `{node_id}` has unknown type `{node_type}`")]
    UnknownNodeType { node_id: String, node_type: String },
}

/// All flows known to this process, keyed by flow id.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: DashMap<String, Arc<Flow>>,
}

impl FlowRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, flow: Flow) -> Arc<Flow> {
        let flow = Arc::new(flow);
        self.flows.insert(flow.id.clone(), flow.clone());
        info!("registered flow `{}`", flow.id);
        flow
    }

    pub fn get(&self, id: &str) -> Option<Arc<Flow>> {
        self.flows.get(id).map(|f| f.value().clone())
    }

    pub fn remove(&self, id: &str) {
        self.flows.remove(id);
        info!("removed flow `{}`", id);
    }

    pub fn ids(&self) -> Vec<String> {
        self.flows.iter().map(|e| e.key().clone()).collect()
    }

    pub fn load_flow_from_file(path: impl AsRef<Path>) -> Result<Flow, FlowError> {
        let json = fs::read_to_string(path)?;
        Flow::from_json(&json)
    }

    /// Loads every `*.json` flow document in `dir`, skipping files that fail
    /// to parse (the error is logged, not raised).
    pub fn load_all_flows_from_dir(&self, dir: &Path) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_flow_from_file(&path) {
                Ok(flow) => {
                    self.register(flow);
                    loaded += 1;
                }
                Err(e) => error!("failed to load {}: {}", path.display(), e),
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_flow_json() -> String {
        json!({
            "version": "1.0",
            "id": "support",
            "name": "Support triage",
            "entryNode": "n1",
            "nodes": [
                {"id": "n1", "type": "start", "name": "Start", "position": {"x": 0.0, "y": 0.0},
                 "config": {"welcomeMessage": "Hi {{customer}}"}},
                {"id": "n2", "type": "collect_input", "name": "Ask", "position": {"x": 0.0, "y": 100.0},
                 "config": {"prompt": "How can I help?", "variableName": "user_message"}},
                {"id": "n3", "type": "end", "name": "Done", "position": {"x": 0.0, "y": 200.0},
                 "config": {"status": "completed"}}
            ],
            "edges": [
                {"id": "e1", "source": "n1", "target": "n2"},
                {"id": "e2", "source": "n2", "target": "n3", "label": "done"}
            ],
            "variables": [
                {"name": "customer", "type": "string", "defaultValue": "there"}
            ],
            "tools": [],
            "metadata": {"createdBy": "tests"}
        })
        .to_string()
    }

    #[test]
    fn parses_wire_format_and_builds_indexes() {
        let flow = Flow::from_json(&sample_flow_json()).unwrap();
        assert_eq!(flow.entry_node, "n1");
        assert!(flow.node("n2").is_some());
        assert!(flow.node("nope").is_none());

        let edges = flow.outgoing_edges("n1");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, "n2");
        assert_eq!(flow.outgoing_edges("n3").len(), 0);

        match &flow.node("n1").unwrap().kind {
            NodeKind::Start(cfg) => {
                assert_eq!(cfg.welcome_message.as_deref(), Some("Hi {{customer}}"))
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn rejects_wrong_version() {
        let json = sample_flow_json().replace("\"1.0\"", "\"2.0\"");
        match Flow::from_json(&json) {
            Err(FlowError::UnsupportedVersion(v)) => assert_eq!(v, "2.0"),
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_node_type() {
        let json = sample_flow_json().replace("\"collect_input\"", "\"teleport\"");
        match Flow::from_json(&json) {
            Err(FlowError::UnknownNodeType { node_id, node_type }) => {
                assert_eq!(node_id, "n2");
                assert_eq!(node_type, "teleport");
            }
            other => panic!("expected unknown node type, got {:?}", other),
        }
    }

    #[test]
    fn flow_serialization_round_trips() {
        let flow = Flow::from_json(&sample_flow_json()).unwrap();
        let text = serde_json::to_string(&flow).unwrap();
        let back = Flow::from_json(&text).unwrap();
        assert_eq!(back.id, flow.id);
        assert_eq!(back.nodes.len(), flow.nodes.len());
        assert_eq!(back.edges.len(), flow.edges.len());
    }

    #[test]
    fn registry_registers_and_removes() {
        let registry = FlowRegistry::new();
        let flow = Flow::from_json(&sample_flow_json()).unwrap();
        registry.register(flow);
        assert!(registry.get("support").is_some());
        registry.remove("support");
        assert!(registry.get("support").is_none());
    }

    #[test]
    fn registry_loads_flows_from_dir_and_skips_bad_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("support.json"), sample_flow_json()).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = FlowRegistry::new();
        let loaded = registry.load_all_flows_from_dir(dir.path()).unwrap();
        assert_eq!(loaded, 1);
        assert!(registry.get("support").is_some());
    }
}

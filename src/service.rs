use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::flow::ModelConfig;

/// Failure raised by a service adapter itself (transport, provider,
/// deadline), as opposed to an in-band result like a tool's `success:false`.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Provider(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// One intent candidate handed to the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IntentChoice {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub intents: Vec<IntentChoice>,
    pub model: Option<ModelConfig>,
}

/// Classifier verdict. `intent` should be one of the offered names; the
/// engine treats anything else as no-match.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub intent: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Intent classification plus optional free-form generation.
#[async_trait]
pub trait AiService: Send + Sync + Debug {
    async fn classify(&self, req: ClassifyRequest) -> Result<Classification, ServiceError>;

    /// Not used by any node handler in this runtime; adapters may support it
    /// for channel-side rephrasing.
    async fn generate(&self, _prompt: String) -> Result<String, ServiceError> {
        Err(ServiceError::Unsupported("generate"))
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub knowledge_base_id: String,
    pub query: String,
    pub top_k: usize,
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchHit {
    pub content: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub confidence: f64,
    /// True when `answer` is derived solely from the retrieved sources.
    pub grounded: bool,
}

impl SearchResponse {
    /// Canonical "nothing found" shape stored when grounding is required
    /// but the provider could not ground its answer.
    pub fn not_found() -> Self {
        Self {
            results: Vec::new(),
            answer: Some(String::new()),
            confidence: 0.0,
            grounded: false,
        }
    }
}

#[async_trait]
pub trait KnowledgeService: Send + Sync + Debug {
    async fn search(&self, req: SearchRequest) -> Result<SearchResponse, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub tool_id: String,
    pub inputs: HashMap<String, Value>,
    pub timeout: Duration,
}

/// Tool outcome. Failures the tool itself reports come back in-band with
/// `success: false`; only adapter breakage surfaces as `ServiceError`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait ToolService: Send + Sync + Debug {
    async fn execute(&self, req: ToolRequest) -> Result<ToolResponse, ServiceError>;
}

/// The pluggable collaborators a handler may call, injected into the engine
/// at construction.
#[derive(Debug, Clone)]
pub struct Services {
    pub ai: Arc<dyn AiService>,
    pub knowledge: Arc<dyn KnowledgeService>,
    pub tools: Arc<dyn ToolService>,
}

impl Services {
    pub fn new(
        ai: Arc<dyn AiService>,
        knowledge: Arc<dyn KnowledgeService>,
        tools: Arc<dyn ToolService>,
    ) -> Self {
        Self {
            ai,
            knowledge,
            tools,
        }
    }
}

/// Knowledge service for deployments without a retrieval backend: every
/// search comes back empty and ungrounded.
#[derive(Debug, Clone, Default)]
pub struct EmptyKnowledgeService;

#[async_trait]
impl KnowledgeService for EmptyKnowledgeService {
    async fn search(&self, _req: SearchRequest) -> Result<SearchResponse, ServiceError> {
        Ok(SearchResponse::not_found())
    }
}

/// Tool service for deployments without tool adapters: every call fails
/// in-band so node `onError` policies still apply.
#[derive(Debug, Clone, Default)]
pub struct EmptyToolService;

#[async_trait]
impl ToolService for EmptyToolService {
    async fn execute(&self, req: ToolRequest) -> Result<ToolResponse, ServiceError> {
        Ok(ToolResponse {
            success: false,
            output: None,
            error: Some(format!("no adapter registered for tool `{}`", req.tool_id)),
        })
    }
}

//! Per-kind node semantics. Handlers are pure with respect to everything
//! outside the passed [`NodeContext`]: they never touch the store or the
//! event bus, and all side effects travel back in the [`NodeResult`] for the
//! engine to apply.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::ErrorBody;
use crate::flow::Flow;
use crate::service::Services;
use crate::session::{Session, SessionStatus};

pub mod collect_input;
pub mod condition;
pub mod end;
pub mod escalate;
pub mod knowledge_search;
pub mod llm_router;
pub mod message;
pub mod start;
pub mod tool_call;

/// Read-only view a handler executes against. `input` is only present for
/// the first handler invocation of a `process_input` call.
pub struct NodeContext<'a> {
    pub flow: &'a Flow,
    pub session: &'a Session,
    pub input: Option<&'a str>,
    pub services: &'a Services,
    pub config: &'a RuntimeConfig,
}

impl NodeContext<'_> {
    pub fn vars(&self) -> &HashMap<String, Value> {
        &self.session.variables
    }
}

/// What a handler asks the engine to do next.
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    /// Text surfaced to the user.
    pub message: Option<String>,
    /// Opaque log data recorded in the execution step.
    pub output: Option<Value>,
    /// Shallow patch applied to session variables.
    pub variables: HashMap<String, Value>,
    /// Explicit next node; `None` means follow the unique outgoing edge.
    pub next_node_id: Option<String>,
    /// Pause the session until the next `process_input`.
    pub wait_for_input: bool,
    /// Terminal status to finish the session with.
    pub end: Option<SessionStatus>,
    /// Fatal unless the engine is told otherwise; ends the run.
    pub error: Option<ErrorBody>,
}

impl NodeResult {
    /// Continue along the node's unique outgoing edge.
    pub fn advance() -> Self {
        Self::default()
    }

    pub fn goto(node_id: impl Into<String>) -> Self {
        Self {
            next_node_id: Some(node_id.into()),
            ..Self::default()
        }
    }

    pub fn wait() -> Self {
        Self {
            wait_for_input: true,
            ..Self::default()
        }
    }

    pub fn finish(status: SessionStatus) -> Self {
        Self {
            end: Some(status),
            ..Self::default()
        }
    }

    pub fn fail(error: ErrorBody) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn set_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::config::RuntimeConfig;
    use crate::flow::Flow;
    use crate::service::{
        AiService, Classification, ClassifyRequest, EmptyKnowledgeService, EmptyToolService,
        KnowledgeService, SearchRequest, SearchResponse, ServiceError, Services, ToolRequest,
        ToolResponse, ToolService,
    };
    use crate::session::Session;

    pub fn test_flow() -> Flow {
        Flow::from_json(
            &json!({
                "version": "1.0",
                "id": "test-flow",
                "name": "test flow",
                "entryNode": "start",
                "nodes": [
                    {"id": "start", "type": "start", "config": {}},
                    {"id": "done", "type": "end", "config": {}}
                ],
                "edges": [{"id": "e1", "source": "start", "target": "done"}],
                "variables": [],
                "tools": []
            })
            .to_string(),
        )
        .unwrap()
    }

    /// Minimal flow/session/services tuple for handler unit tests.
    pub fn test_context(vars: &[(&str, Value)]) -> (Flow, Session, Services, RuntimeConfig) {
        let flow = test_flow();
        let mut session = Session::new(&flow);
        for (k, v) in vars {
            session.variables.insert(k.to_string(), v.clone());
        }
        let services = Services::new(
            ScriptedAi::with(vec![]),
            Arc::new(EmptyKnowledgeService),
            Arc::new(EmptyToolService),
        );
        (flow, session, services, RuntimeConfig::default())
    }

    /// Classifier that replays a queued script, one result per call.
    #[derive(Debug, Default)]
    pub struct ScriptedAi {
        script: Mutex<VecDeque<Result<Classification, ServiceError>>>,
    }

    impl ScriptedAi {
        pub fn with(results: Vec<Result<Classification, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl AiService for ScriptedAi {
        async fn classify(&self, _req: ClassifyRequest) -> Result<Classification, ServiceError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ServiceError::Provider("classify script exhausted".into())))
        }
    }

    #[derive(Debug)]
    pub struct ScriptedKnowledge {
        pub response: SearchResponse,
        pub last_query: Mutex<Option<String>>,
    }

    impl ScriptedKnowledge {
        pub fn with(response: SearchResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                last_query: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl KnowledgeService for ScriptedKnowledge {
        async fn search(&self, req: SearchRequest) -> Result<SearchResponse, ServiceError> {
            *self.last_query.lock().unwrap() = Some(req.query);
            Ok(self.response.clone())
        }
    }

    /// Tool service that replays a queued script, one result per call.
    #[derive(Debug, Default)]
    pub struct ScriptedTool {
        script: Mutex<VecDeque<Result<ToolResponse, ServiceError>>>,
        pub calls: Mutex<Vec<ToolRequest>>,
    }

    impl ScriptedTool {
        pub fn with(results: Vec<Result<ToolResponse, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolService for ScriptedTool {
        async fn execute(&self, req: ToolRequest) -> Result<ToolResponse, ServiceError> {
            self.calls.lock().unwrap().push(req);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ServiceError::Provider("tool script exhausted".into())))
        }
    }
}

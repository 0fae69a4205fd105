use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::error::{ErrorBody, ErrorCode};
use crate::flow::{FlowNode, NodeKind};
use crate::handlers::{self, NodeContext, NodeResult};

/// Dispatches a node to its kind handler. Handlers report failure through
/// `NodeResult.error`; anything that panics anyway is caught here and
/// wrapped so the run loop only ever sees a structured result.
#[tracing::instrument(name = "execute_node", skip(node, ctx), fields(node_id = %node.id, kind = node.kind.name()))]
pub async fn execute_node(node: &FlowNode, ctx: &NodeContext<'_>) -> NodeResult {
    match AssertUnwindSafe(dispatch(node, ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => NodeResult::fail(ErrorBody::new(
            ErrorCode::ExecutionError,
            format!("handler for node `{}` panicked", node.id),
        )),
    }
}

async fn dispatch(node: &FlowNode, ctx: &NodeContext<'_>) -> NodeResult {
    match &node.kind {
        NodeKind::Start(cfg) => handlers::start::handle(cfg, ctx).await,
        NodeKind::Message(cfg) => handlers::message::handle(cfg, ctx).await,
        NodeKind::CollectInput(cfg) => handlers::collect_input::handle(cfg, ctx).await,
        NodeKind::LlmRouter(cfg) => handlers::llm_router::handle(cfg, ctx).await,
        NodeKind::KnowledgeSearch(cfg) => handlers::knowledge_search::handle(cfg, ctx).await,
        NodeKind::ToolCall(cfg) => handlers::tool_call::handle(cfg, ctx).await,
        NodeKind::Condition(cfg) => handlers::condition::handle(cfg, ctx).await,
        NodeKind::Escalate(cfg) => handlers::escalate::handle(cfg, ctx).await,
        NodeKind::End(cfg) => handlers::end::handle(cfg, ctx).await,
    }
}

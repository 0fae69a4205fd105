use serde_json::{json, Value};

use super::{NodeContext, NodeResult};
use crate::error::{ErrorBody, ErrorCode};
use crate::flow::KnowledgeSearchConfig;
use crate::service::SearchRequest;
use crate::value::interpolate;

const DEFAULT_TOP_K: usize = 3;
const DEFAULT_MIN_SCORE: f64 = 0.5;

/// Runs a retrieval query and stores the response in `result_variable`.
/// With `grounded_only`, an ungrounded answer is replaced by the canonical
/// not-found shape so downstream conditions can test `grounded`.
pub async fn handle(cfg: &KnowledgeSearchConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let query = interpolate(&cfg.query, ctx.vars());
    let request = SearchRequest {
        knowledge_base_id: cfg.knowledge_base_id.clone(),
        query,
        top_k: cfg.top_k.unwrap_or(DEFAULT_TOP_K),
        min_score: cfg.min_score.unwrap_or(DEFAULT_MIN_SCORE),
    };

    match ctx.services.knowledge.search(request).await {
        Ok(response) => {
            let stored: Value = if cfg.grounded_only.unwrap_or(false) && !response.grounded {
                json!({"answer": "", "sources": [], "confidence": 0, "grounded": false})
            } else {
                serde_json::to_value(&response).unwrap_or(Value::Null)
            };
            NodeResult::advance()
                .with_output(stored.clone())
                .set_var(&cfg.result_variable, stored)
        }
        Err(err) => NodeResult::fail(ErrorBody::new(
            ErrorCode::ExecutionError,
            format!("knowledge search failed: {err}"),
        )),
    }
}

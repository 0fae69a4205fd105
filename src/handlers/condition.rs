use serde_json::{json, Value};

use super::{NodeContext, NodeResult};
use crate::flow::ConditionConfig;
use crate::value::{compare, resolve};

/// Evaluates rules in declared order; the first match routes. No match goes
/// to `default_node_id` when set, otherwise along the unique outgoing edge.
pub async fn handle(cfg: &ConditionConfig, ctx: &NodeContext<'_>) -> NodeResult {
    for rule in &cfg.conditions {
        let lhs = resolve(ctx.vars(), &rule.variable);
        if compare(rule.operator, lhs, &rule.value) {
            return NodeResult::goto(&rule.target_node_id).with_output(json!({
                "matched": rule.id,
                "variable": rule.variable,
            }));
        }
    }
    let result = NodeResult::advance().with_output(json!({"matched": Value::Null}));
    match &cfg.default_node_id {
        Some(id) => NodeResult {
            next_node_id: Some(id.clone()),
            ..result
        },
        None => result,
    }
}

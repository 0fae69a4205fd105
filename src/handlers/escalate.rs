use serde_json::{json, Map, Value};

use super::{NodeContext, NodeResult};
use crate::flow::EscalateConfig;
use crate::session::SessionStatus;
use crate::value::{interpolate, interpolate_path};

/// Hands the conversation to a human queue and terminates the session as
/// escalated. The full handoff record lands in the step output. Context
/// values accept dotted-path tokens so nested lookups reach the agent.
pub async fn handle(cfg: &EscalateConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let context: Value = match &cfg.context {
        Some(entries) => {
            let mut map = Map::new();
            for (key, template) in entries {
                map.insert(key.clone(), json!(interpolate_path(template, ctx.vars())));
            }
            Value::Object(map)
        }
        None => Value::Null,
    };

    let mut result = NodeResult::finish(SessionStatus::Escalated).with_output(json!({
        "reason": cfg.reason,
        "queue": cfg.queue,
        "priority": cfg.priority,
        "context": context,
    }));
    if let Some(handoff) = &cfg.handoff_message {
        result.message = Some(interpolate(handoff, ctx.vars()));
    }
    result
}

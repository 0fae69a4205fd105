use serde_json::json;

use super::{NodeContext, NodeResult};
use crate::flow::{EndConfig, EndStatus};
use crate::session::SessionStatus;
use crate::value::interpolate;

/// Terminates the session with the node's configured status.
pub async fn handle(cfg: &EndConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let status = match cfg.status {
        EndStatus::Completed => SessionStatus::Completed,
        EndStatus::Escalated => SessionStatus::Escalated,
        EndStatus::Abandoned => SessionStatus::Abandoned,
        EndStatus::Error => SessionStatus::Error,
    };

    let mut result = NodeResult::finish(status);
    if let Some(message) = &cfg.message {
        result.message = Some(interpolate(message, ctx.vars()));
    }
    if let Some(summary) = &cfg.summary {
        result.output = Some(json!({"summary": interpolate(summary, ctx.vars())}));
    }
    result
}

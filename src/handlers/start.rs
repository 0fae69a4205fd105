use super::{NodeContext, NodeResult};
use crate::flow::StartConfig;
use crate::value::interpolate;

/// Entry node: greet, seed initial variables, continue. Never waits.
pub async fn handle(cfg: &StartConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let mut result = NodeResult::advance();
    if let Some(welcome) = &cfg.welcome_message {
        result.message = Some(interpolate(welcome, ctx.vars()));
    }
    if let Some(init) = &cfg.init_variables {
        result.variables = init.clone();
    }
    result
}

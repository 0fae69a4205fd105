use tokio::time::{sleep, Duration};

use super::{NodeContext, NodeResult};
use crate::flow::MessageConfig;
use crate::value::interpolate;

/// Emits the interpolated text, optionally after an author-configured
/// typing delay, then continues along the unique outgoing edge.
pub async fn handle(cfg: &MessageConfig, ctx: &NodeContext<'_>) -> NodeResult {
    if let Some(delay) = cfg.delay {
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
    }
    NodeResult::advance().with_message(interpolate(&cfg.message, ctx.vars()))
}

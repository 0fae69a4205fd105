use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};

use super::{NodeContext, NodeResult};
use crate::error::{ErrorBody, ErrorCode};
use crate::flow::{OnErrorAction, ToolCallConfig};
use crate::service::{ServiceError, ToolRequest, ToolResponse};
use crate::value::interpolate;

const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Invokes an external tool with interpolated inputs and applies the node's
/// `on_error` policy on failure. The deadline is both passed to the adapter
/// and enforced here, so a stuck adapter still counts as a tool failure.
pub async fn handle(cfg: &ToolCallConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let inputs: HashMap<String, Value> = cfg
        .inputs
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(template) => Value::String(interpolate(template, ctx.vars())),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect();

    let deadline = cfg
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_millis(ctx.config.default_tool_timeout_ms));

    let mut attempt = execute(cfg, ctx, &inputs, deadline).await;

    if failed(&attempt) && matches!(cfg.on_error.as_ref().map(|e| e.action), Some(OnErrorAction::Retry)) {
        let backoff = cfg
            .retry
            .as_ref()
            .and_then(|r| r.backoff_ms)
            .unwrap_or(DEFAULT_RETRY_BACKOFF_MS);
        sleep(Duration::from_millis(backoff)).await;
        attempt = execute(cfg, ctx, &inputs, deadline).await;
    }

    match attempt {
        Ok(response) if response.success => {
            let output = response.output.unwrap_or(Value::Null);
            NodeResult::advance()
                .with_output(output.clone())
                .set_var(&cfg.result_variable, output)
        }
        other => {
            let (message, transport) = match other {
                Ok(response) => (
                    response
                        .error
                        .unwrap_or_else(|| "tool reported failure".to_string()),
                    false,
                ),
                Err(err) => (err.to_string(), true),
            };
            apply_on_error(cfg, message, transport)
        }
    }
}

async fn execute(
    cfg: &ToolCallConfig,
    ctx: &NodeContext<'_>,
    inputs: &HashMap<String, Value>,
    deadline: Duration,
) -> Result<ToolResponse, ServiceError> {
    let request = ToolRequest {
        tool_id: cfg.tool_id.clone(),
        inputs: inputs.clone(),
        timeout: deadline,
    };
    match timeout(deadline, ctx.services.tools.execute(request)).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(deadline)),
    }
}

fn failed(attempt: &Result<ToolResponse, ServiceError>) -> bool {
    match attempt {
        Ok(response) => !response.success,
        Err(_) => true,
    }
}

fn apply_on_error(cfg: &ToolCallConfig, message: String, transport: bool) -> NodeResult {
    match cfg.on_error.as_ref().map(|e| (e.action, e.target_node_id.clone())) {
        Some((OnErrorAction::Continue, _)) => {
            let stored = json!({"error": message, "success": false});
            NodeResult::advance()
                .with_output(stored.clone())
                .set_var(&cfg.result_variable, stored)
        }
        Some((OnErrorAction::Goto, Some(target))) => NodeResult::goto(target)
            .with_output(json!({"error": message, "success": false})),
        Some((OnErrorAction::Goto, None)) => NodeResult::fail(ErrorBody::new(
            ErrorCode::ExecutionError,
            format!(
                "tool `{}` failed and onError.goto has no targetNodeId",
                cfg.tool_id
            ),
        )),
        // authors wire the outgoing edge to an escalation node
        Some((OnErrorAction::Escalate, _)) => {
            NodeResult::advance().with_output(json!({"error": message}))
        }
        Some((OnErrorAction::Retry, _)) | None => {
            let code = if transport {
                ErrorCode::ToolCallError
            } else {
                ErrorCode::ToolCallFailed
            };
            NodeResult::fail(
                ErrorBody::new(code, format!("tool `{}` failed: {}", cfg.tool_id, message))
                    .with_details(json!({"toolId": cfg.tool_id})),
            )
        }
    }
}

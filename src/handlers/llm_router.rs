use serde_json::json;

use super::{NodeContext, NodeResult};
use crate::error::{ErrorBody, ErrorCode};
use crate::flow::LlmRouterConfig;
use crate::service::{ClassifyRequest, IntentChoice};
use crate::value::display_value;

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Routes on the classifier's verdict: low confidence or an unrecognised
/// intent falls back to `fallback_intent` when configured, a classifier
/// failure falls back likewise (or surfaces), and everything records
/// `last_intent` / `last_confidence` for downstream conditions.
pub async fn handle(cfg: &LlmRouterConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let user_message = resolve_user_message(ctx);

    let request = ClassifyRequest {
        system_prompt: cfg.system_prompt.clone(),
        user_message,
        intents: cfg
            .intents
            .iter()
            .map(|i| IntentChoice {
                name: i.name.clone(),
                description: i.description.clone(),
            })
            .collect(),
        model: cfg.model.clone(),
    };

    match ctx.services.ai.classify(request).await {
        Ok(verdict) => {
            let threshold = cfg
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
            if verdict.confidence < threshold && cfg.fallback_intent.is_some() {
                return route_fallback(cfg, &verdict.intent, verdict.confidence);
            }
            match cfg.intents.iter().find(|i| i.name == verdict.intent) {
                Some(route) => NodeResult::goto(&route.target_node_id)
                    .with_output(json!({
                        "intent": verdict.intent,
                        "confidence": verdict.confidence,
                        "reasoning": verdict.reasoning,
                    }))
                    .set_var("last_intent", json!(verdict.intent))
                    .set_var("last_confidence", json!(verdict.confidence)),
                None if cfg.fallback_intent.is_some() => {
                    route_fallback(cfg, &verdict.intent, verdict.confidence)
                }
                None => NodeResult::fail(
                    ErrorBody::new(
                        ErrorCode::IntentNotFound,
                        format!("classifier returned unknown intent `{}`", verdict.intent),
                    )
                    .with_details(json!({"intent": verdict.intent})),
                )
                .set_var("last_intent", json!(verdict.intent))
                .set_var("last_confidence", json!(verdict.confidence)),
            }
        }
        Err(err) => {
            let rules_provider = cfg
                .model
                .as_ref()
                .is_some_and(|m| m.provider == "rules");
            if cfg.fallback_intent.is_some() || rules_provider {
                route_fallback(cfg, "", 0.0)
            } else {
                NodeResult::fail(ErrorBody::new(
                    ErrorCode::ExecutionError,
                    format!("intent classification failed: {err}"),
                ))
            }
        }
    }
}

fn route_fallback(cfg: &LlmRouterConfig, original: &str, confidence: f64) -> NodeResult {
    let Some(name) = cfg.fallback_intent.as_deref() else {
        return NodeResult::fail(ErrorBody::new(
            ErrorCode::IntentNotFound,
            "no fallback intent configured",
        ));
    };
    match cfg.intents.iter().find(|i| i.name == name) {
        Some(route) => NodeResult::goto(&route.target_node_id)
            .with_output(json!({
                "intent": name,
                "originalIntent": original,
                "confidence": confidence,
                "fellback": true,
            }))
            .set_var("last_intent", json!(name))
            .set_var("last_confidence", json!(confidence)),
        None => NodeResult::fail(
            ErrorBody::new(
                ErrorCode::IntentNotFound,
                format!("fallback intent `{name}` is not defined in this router"),
            )
            .with_details(json!({"intent": name})),
        ),
    }
}

/// Where the classified text comes from: explicit turn input first, then the
/// conventional `user_message` / `customer_message` variables.
fn resolve_user_message(ctx: &NodeContext<'_>) -> String {
    if let Some(input) = ctx.input {
        return input.to_string();
    }
    for name in ["user_message", "customer_message"] {
        if let Some(v) = ctx.vars().get(name) {
            if !v.is_null() {
                return display_value(v);
            }
        }
    }
    String::new()
}

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::{NodeContext, NodeResult};
use crate::error::{ErrorBody, ErrorCode};
use crate::flow::{CollectInputConfig, ValidationConfig, ValidationKind};
use crate::value::interpolate;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s\-+()]{10,}$").expect("phone pattern"));

const DEFAULT_INVALID_MESSAGE: &str = "Invalid input. Please try again.";

/// Two-phase input collection.
///
/// Entering the node (no input on the context) emits the prompt and pauses.
/// Resuming with input validates it, either storing the value and moving on
/// or re-prompting within the configured retry budget.
pub async fn handle(cfg: &CollectInputConfig, ctx: &NodeContext<'_>) -> NodeResult {
    let Some(input) = ctx.input else {
        let mut result = NodeResult::wait();
        if let Some(prompt) = &cfg.prompt {
            result.message = Some(interpolate(prompt, ctx.vars()));
        }
        return result;
    };

    let attempts_key = format!("{}_attempts", cfg.variable_name);
    match validate(input, cfg.validation.as_ref()) {
        Ok(value) => {
            let mut result = NodeResult::advance().set_var(&cfg.variable_name, value);
            if cfg.retry.is_some() || ctx.vars().contains_key(&attempts_key) {
                result = result.set_var(&attempts_key, json!(0));
            }
            result
        }
        Err(reason) => {
            let Some(retry) = &cfg.retry else {
                let message = cfg
                    .validation
                    .as_ref()
                    .and_then(|v| v.error_message.clone())
                    .unwrap_or_else(|| DEFAULT_INVALID_MESSAGE.to_string());
                return NodeResult::wait()
                    .with_message(message)
                    .with_output(json!({"valid": false, "reason": reason}));
            };

            let attempts = ctx
                .vars()
                .get(&attempts_key)
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;
            if attempts >= u64::from(retry.max_attempts) {
                return NodeResult::fail(
                    ErrorBody::new(
                        ErrorCode::MaxRetriesExceeded,
                        format!(
                            "validation failed {} times for `{}`",
                            attempts, cfg.variable_name
                        ),
                    )
                    .with_details(json!({"reason": reason})),
                )
                .set_var(&attempts_key, json!(attempts));
            }
            NodeResult::wait()
                .with_message(interpolate(&retry.retry_message, ctx.vars()))
                .with_output(json!({"valid": false, "reason": reason, "attempt": attempts}))
                .set_var(&attempts_key, json!(attempts))
        }
    }
}

/// Validates raw input and returns the value to store: numbers parse to
/// JSON numbers, everything else stays a string.
fn validate(input: &str, validation: Option<&ValidationConfig>) -> Result<Value, String> {
    let Some(validation) = validation else {
        return Ok(Value::String(input.to_string()));
    };
    match validation.kind {
        ValidationKind::Text => {
            let len = input.chars().count();
            if let Some(min) = validation.min_length {
                if len < min {
                    return Err(format!("must be at least {min} characters"));
                }
            }
            if let Some(max) = validation.max_length {
                if len > max {
                    return Err(format!("must be at most {max} characters"));
                }
            }
            Ok(Value::String(input.to_string()))
        }
        ValidationKind::Number => {
            let n: f64 = input
                .trim()
                .parse()
                .map_err(|_| "not a number".to_string())?;
            if let Some(min) = validation.min {
                if n < min {
                    return Err(format!("must be at least {min}"));
                }
            }
            if let Some(max) = validation.max {
                if n > max {
                    return Err(format!("must be at most {max}"));
                }
            }
            Ok(serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(input.to_string())))
        }
        ValidationKind::Email => {
            if EMAIL_RE.is_match(input.trim()) {
                Ok(Value::String(input.trim().to_string()))
            } else {
                Err("not a valid email address".to_string())
            }
        }
        ValidationKind::Phone => {
            if PHONE_RE.is_match(input.trim()) {
                Ok(Value::String(input.trim().to_string()))
            } else {
                Err("not a valid phone number".to_string())
            }
        }
        ValidationKind::Regex => {
            let pattern = validation.pattern.as_deref().unwrap_or("");
            if pattern.is_empty() {
                return Ok(Value::String(input.to_string()));
            }
            match Regex::new(pattern) {
                // an unparseable author pattern never blocks the user
                Err(_) => Ok(Value::String(input.to_string())),
                Ok(re) if re.is_match(input) => Ok(Value::String(input.to_string())),
                Ok(_) => Err(format!("must match /{pattern}/")),
            }
        }
        ValidationKind::Date | ValidationKind::Custom => Ok(Value::String(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::RetryPrompt;
    use crate::handlers::tests_support::test_context;

    fn email_cfg(retry: Option<RetryPrompt>) -> CollectInputConfig {
        CollectInputConfig {
            prompt: Some("Your email?".into()),
            variable_name: "email".into(),
            validation: Some(ValidationConfig {
                kind: ValidationKind::Email,
                min_length: None,
                max_length: None,
                min: None,
                max: None,
                pattern: None,
                error_message: None,
            }),
            retry,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn entering_emits_prompt_and_waits() {
        let (flow, session, services, config) = test_context(&[]);
        let ctx = NodeContext {
            flow: &flow,
            session: &session,
            input: None,
            services: &services,
            config: &config,
        };
        let result = handle(&email_cfg(None), &ctx).await;
        assert!(result.wait_for_input);
        assert_eq!(result.message.as_deref(), Some("Your email?"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn valid_input_stores_variable_and_advances() {
        let (flow, session, services, config) = test_context(&[]);
        let ctx = NodeContext {
            flow: &flow,
            session: &session,
            input: Some("a@b.co"),
            services: &services,
            config: &config,
        };
        let result = handle(&email_cfg(None), &ctx).await;
        assert!(!result.wait_for_input);
        assert_eq!(result.variables.get("email"), Some(&json!("a@b.co")));
    }

    #[tokio::test]
    async fn invalid_input_without_retry_reprompts_with_default_message() {
        let (flow, session, services, config) = test_context(&[]);
        let ctx = NodeContext {
            flow: &flow,
            session: &session,
            input: Some("nope"),
            services: &services,
            config: &config,
        };
        let result = handle(&email_cfg(None), &ctx).await;
        assert!(result.wait_for_input);
        assert_eq!(result.message.as_deref(), Some(DEFAULT_INVALID_MESSAGE));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn retry_budget_counts_up_then_fails() {
        let retry = RetryPrompt {
            max_attempts: 2,
            retry_message: "Try again.".into(),
        };
        let (flow, mut session, services, config) = test_context(&[]);

        // first invalid attempt re-prompts
        let ctx = NodeContext {
            flow: &flow,
            session: &session,
            input: Some("bad"),
            services: &services,
            config: &config,
        };
        let first = handle(&email_cfg(Some(retry.clone())), &ctx).await;
        assert!(first.wait_for_input);
        assert_eq!(first.message.as_deref(), Some("Try again."));
        assert_eq!(first.variables.get("email_attempts"), Some(&json!(1)));

        // second invalid attempt exhausts the budget
        session.apply_variables(first.variables);
        let ctx = NodeContext {
            flow: &flow,
            session: &session,
            input: Some("still bad"),
            services: &services,
            config: &config,
        };
        let second = handle(&email_cfg(Some(retry)), &ctx).await;
        let error = second.error.expect("expected max-retries error");
        assert_eq!(error.code, ErrorCode::MaxRetriesExceeded);
    }

    #[tokio::test]
    async fn success_resets_attempt_counter() {
        let retry = RetryPrompt {
            max_attempts: 3,
            retry_message: "Try again.".into(),
        };
        let (flow, session, services, config) = test_context(&[("email_attempts", json!(1))]);
        let ctx = NodeContext {
            flow: &flow,
            session: &session,
            input: Some("a@b.co"),
            services: &services,
            config: &config,
        };
        let result = handle(&email_cfg(Some(retry)), &ctx).await;
        assert_eq!(result.variables.get("email_attempts"), Some(&json!(0)));
        assert_eq!(result.variables.get("email"), Some(&json!("a@b.co")));
    }

    #[test]
    fn number_validation_parses_and_bounds() {
        let cfg = ValidationConfig {
            kind: ValidationKind::Number,
            min_length: None,
            max_length: None,
            min: Some(1.0),
            max: Some(10.0),
            pattern: None,
            error_message: None,
        };
        assert_eq!(validate("7", Some(&cfg)).unwrap(), json!(7.0));
        assert!(validate("0", Some(&cfg)).is_err());
        assert!(validate("eleven", Some(&cfg)).is_err());
    }

    #[test]
    fn text_validation_checks_length_bounds() {
        let cfg = ValidationConfig {
            kind: ValidationKind::Text,
            min_length: Some(2),
            max_length: Some(4),
            min: None,
            max: None,
            pattern: None,
            error_message: None,
        };
        assert!(validate("ok", Some(&cfg)).is_ok());
        assert!(validate("x", Some(&cfg)).is_err());
        assert!(validate("toolong", Some(&cfg)).is_err());
    }

    #[test]
    fn phone_validation_accepts_formatted_numbers() {
        let cfg = ValidationConfig {
            kind: ValidationKind::Phone,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
            error_message: None,
        };
        assert!(validate("+1 (555) 123-4567", Some(&cfg)).is_ok());
        assert!(validate("555", Some(&cfg)).is_err());
    }

    #[test]
    fn regex_validation_treats_empty_or_broken_pattern_as_pass() {
        let mut cfg = ValidationConfig {
            kind: ValidationKind::Regex,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: Some(String::new()),
            error_message: None,
        };
        assert!(validate("anything", Some(&cfg)).is_ok());

        cfg.pattern = Some("([broken".into());
        assert!(validate("anything", Some(&cfg)).is_ok());

        cfg.pattern = Some("^ab+$".into());
        assert!(validate("abb", Some(&cfg)).is_ok());
        assert!(validate("ba", Some(&cfg)).is_err());
    }
}

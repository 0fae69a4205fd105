use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Replaces every `{{name}}` token with the string form of `vars[name]`.
///
/// A token whose name is unknown or bound to null stays in the output
/// verbatim. Names are matched as flat map keys; dotted-path evaluation is
/// reserved for condition rules and escalation context.
pub fn interpolate(template: &str, vars: &HashMap<String, Value>) -> String {
    render(template, |name| vars.get(name))
}

/// Like [`interpolate`], but tokens may be dotted paths (`{{a.b.c}}`)
/// resolved through nested objects. Used for escalation context values.
pub fn interpolate_path(template: &str, vars: &HashMap<String, Value>) -> String {
    render(template, |name| resolve(vars, name))
}

fn render<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let token = &rest[open..open + 2 + close + 2];
                let name = after[..close].trim();
                match lookup(name) {
                    Some(value) if !value.is_null() => out.push_str(&display_value(value)),
                    _ => out.push_str(token),
                }
                rest = &after[close + 2..];
            }
            None => {
                // unbalanced `{{`, keep the tail as-is
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Walks a dotted path (`a.b.c`) through the variable map.
///
/// Returns `None` when any intermediate or the leaf is missing, which is
/// distinct from a present-but-null leaf (`Some(&Value::Null)`).
pub fn resolve<'a>(vars: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// The string form used by templates and string-typed comparisons: strings
/// verbatim, everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Operator set available to condition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Contains,
    StartsWith,
    EndsWith,
    MatchesRegex,
    IsEmpty,
    IsNotEmpty,
}

/// Evaluates one operator against a resolved left-hand side (`None` =
/// absent) and the rule's literal right-hand side. Never errors: anything
/// that does not normalise cleanly simply does not match.
pub fn compare(op: ConditionOperator, lhs: Option<&Value>, rhs: &Value) -> bool {
    use ConditionOperator::*;

    match op {
        IsEmpty => is_empty(lhs),
        IsNotEmpty => !is_empty(lhs),
        _ => {
            let Some(lhs) = lhs else { return false };
            match op {
                Equals => values_equal(lhs, rhs),
                NotEquals => !values_equal(lhs, rhs),
                GreaterThan => numeric(lhs, rhs).map_or(false, |(a, b)| a > b),
                GreaterEqual => numeric(lhs, rhs).map_or(false, |(a, b)| a >= b),
                LessThan => numeric(lhs, rhs).map_or(false, |(a, b)| a < b),
                LessEqual => numeric(lhs, rhs).map_or(false, |(a, b)| a <= b),
                Contains => display_value(lhs).contains(&display_value(rhs)),
                StartsWith => display_value(lhs).starts_with(&display_value(rhs)),
                EndsWith => display_value(lhs).ends_with(&display_value(rhs)),
                MatchesRegex => match Regex::new(&display_value(rhs)) {
                    Ok(re) => re.is_match(&display_value(lhs)),
                    Err(_) => false,
                },
                IsEmpty | IsNotEmpty => unreachable!(),
            }
        }
    }
}

fn is_empty(lhs: Option<&Value>) -> bool {
    match lhs {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    // numbers stored as strings, booleans rendered by channels, etc.
    display_value(lhs) == display_value(rhs)
}

fn numeric(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
    Some((as_number(lhs)?, as_number(rhs)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn interpolate_replaces_known_names() {
        let v = vars(&[("name", json!("Ada")), ("count", json!(3))]);
        assert_eq!(
            interpolate("Hi {{name}}, you have {{count}} items", &v),
            "Hi Ada, you have 3 items"
        );
    }

    #[test]
    fn interpolate_keeps_unknown_and_null_tokens() {
        let v = vars(&[("gone", Value::Null)]);
        assert_eq!(
            interpolate("{{missing}} and {{gone}}", &v),
            "{{missing}} and {{gone}}"
        );
    }

    #[test]
    fn interpolate_ignores_dotted_paths() {
        let v = vars(&[("r", json!({"status": "ok"}))]);
        assert_eq!(interpolate("{{r.status}}", &v), "{{r.status}}");
    }

    #[test]
    fn interpolate_path_walks_dotted_paths() {
        let v = vars(&[("r", json!({"status": "ok"})), ("name", json!("Ada"))]);
        assert_eq!(interpolate_path("{{name}}: {{r.status}}", &v), "Ada: ok");
        // missing leaves and null leaves keep the token
        assert_eq!(interpolate_path("{{r.missing}}", &v), "{{r.missing}}");
        let v = vars(&[("r", json!({"x": null}))]);
        assert_eq!(interpolate_path("{{r.x}}", &v), "{{r.x}}");
    }

    #[test]
    fn interpolate_leaves_unbalanced_braces() {
        let v = vars(&[("a", json!("x"))]);
        assert_eq!(interpolate("{{a}} {{oops", &v), "x {{oops");
    }

    #[test]
    fn resolve_walks_nested_objects() {
        let v = vars(&[("r", json!({"order": {"status": "shipped"}}))]);
        assert_eq!(resolve(&v, "r.order.status"), Some(&json!("shipped")));
        assert_eq!(resolve(&v, "r.order.missing"), None);
        assert_eq!(resolve(&v, "missing.leaf"), None);
    }

    #[test]
    fn resolve_distinguishes_null_from_absent() {
        let v = vars(&[("r", json!({"x": null}))]);
        assert_eq!(resolve(&v, "r.x"), Some(&Value::Null));
        assert_eq!(resolve(&v, "r.y"), None);
    }

    #[test]
    fn equals_falls_back_to_string_form() {
        assert!(compare(ConditionOperator::Equals, Some(&json!(5)), &json!("5")));
        assert!(compare(
            ConditionOperator::Equals,
            Some(&json!("ok")),
            &json!("ok")
        ));
        assert!(!compare(
            ConditionOperator::Equals,
            Some(&json!("ok")),
            &json!("nope")
        ));
    }

    #[test]
    fn ordered_comparison_requires_numbers() {
        assert!(compare(
            ConditionOperator::GreaterThan,
            Some(&json!("10")),
            &json!(3)
        ));
        assert!(!compare(
            ConditionOperator::GreaterThan,
            Some(&json!("abc")),
            &json!(3)
        ));
        assert!(!compare(ConditionOperator::LessThan, None, &json!(3)));
    }

    #[test]
    fn string_operators_use_display_form() {
        assert!(compare(
            ConditionOperator::Contains,
            Some(&json!("refund please")),
            &json!("refund")
        ));
        assert!(compare(
            ConditionOperator::StartsWith,
            Some(&json!(1234)),
            &json!("12")
        ));
        assert!(compare(
            ConditionOperator::EndsWith,
            Some(&json!("order-42")),
            &json!("42")
        ));
    }

    #[test]
    fn invalid_regex_never_matches_and_never_panics() {
        assert!(!compare(
            ConditionOperator::MatchesRegex,
            Some(&json!("anything")),
            &json!("([unclosed")
        ));
        assert!(compare(
            ConditionOperator::MatchesRegex,
            Some(&json!("a@b.co")),
            &json!("^[^@]+@")
        ));
    }

    #[test]
    fn is_empty_covers_absent_null_and_empty_string() {
        assert!(compare(ConditionOperator::IsEmpty, None, &Value::Null));
        assert!(compare(
            ConditionOperator::IsEmpty,
            Some(&Value::Null),
            &Value::Null
        ));
        assert!(compare(
            ConditionOperator::IsEmpty,
            Some(&json!("")),
            &Value::Null
        ));
        assert!(!compare(
            ConditionOperator::IsEmpty,
            Some(&json!(0)),
            &Value::Null
        ));
        assert!(compare(
            ConditionOperator::IsNotEmpty,
            Some(&json!("x")),
            &Value::Null
        ));
    }
}

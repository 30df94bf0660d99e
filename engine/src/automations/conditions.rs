// Condition evaluation over trigger payloads.
//
// Pure functions, no I/O. Malformed paths or values never raise: a
// condition that cannot be evaluated is a false match.

use serde_json::Value;

use relay_shared::{Condition, ConditionOperator, LogicalOperator};

/// Resolve a dot-path (`client.tier`) into nested JSON. Missing segments
/// resolve to `None` rather than an error.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Evaluate a condition list against trigger data.
///
/// Ungrouped conditions chain into the overall result via their own
/// `logical_operator`. Conditions sharing a `group` label chain among
/// themselves the same way, and every group's combined result is AND-ed
/// into the overall result. An empty list always matches.
pub fn evaluate_conditions(conditions: &[Condition], data: &Value) -> bool {
    if conditions.is_empty() {
        return true;
    }

    let mut overall: Option<bool> = None;
    let mut group_results: Vec<(&str, bool)> = Vec::new();

    for condition in conditions {
        let matched = evaluate_condition(condition, data);
        match condition.group.as_deref() {
            Some(group) => match group_results.iter_mut().find(|(g, _)| *g == group) {
                Some((_, acc)) => *acc = combine(*acc, matched, condition.logical_operator),
                None => group_results.push((group, matched)),
            },
            None => {
                overall = Some(match overall {
                    Some(acc) => combine(acc, matched, condition.logical_operator),
                    None => matched,
                });
            }
        }
    }

    overall.unwrap_or(true) && group_results.iter().all(|(_, matched)| *matched)
}

/// Evaluate a single condition against trigger data.
pub fn evaluate_condition(condition: &Condition, data: &Value) -> bool {
    let resolved = resolve_path(data, &condition.field);

    match condition.operator {
        ConditionOperator::Equals => resolved == Some(&condition.value),
        ConditionOperator::NotEquals => resolved != Some(&condition.value),
        ConditionOperator::GreaterThan => {
            match (resolved.and_then(as_number), as_number(&condition.value)) {
                (Some(field), Some(value)) => field > value,
                _ => false,
            }
        }
        ConditionOperator::LessThan => {
            match (resolved.and_then(as_number), as_number(&condition.value)) {
                (Some(field), Some(value)) => field < value,
                _ => false,
            }
        }
        ConditionOperator::Contains => string_test(resolved, &condition.value, |f, v| f.contains(v)),
        ConditionOperator::StartsWith => {
            string_test(resolved, &condition.value, |f, v| f.starts_with(v))
        }
        ConditionOperator::EndsWith => {
            string_test(resolved, &condition.value, |f, v| f.ends_with(v))
        }
        ConditionOperator::In => match (resolved, condition.value.as_array()) {
            (Some(field), Some(list)) => list.contains(field),
            _ => false,
        },
        ConditionOperator::NotIn => match condition.value.as_array() {
            Some(list) => resolved.is_none_or(|field| !list.contains(field)),
            // A non-list value is malformed, which is a false match.
            None => false,
        },
        ConditionOperator::Exists => resolved.is_some_and(|v| !v.is_null()),
        ConditionOperator::NotExists => resolved.is_none_or(Value::is_null),
    }
}

fn combine(acc: bool, value: bool, operator: LogicalOperator) -> bool {
    match operator {
        LogicalOperator::And => acc && value,
        LogicalOperator::Or => acc || value,
    }
}

/// Numeric coercion: numbers pass through, numeric strings parse, booleans
/// map to 0/1. Everything else refuses to compare.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// String coercion for substring operators.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_test(resolved: Option<&Value>, value: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (resolved.and_then(as_text), as_text(value)) {
        (Some(field), Some(value)) => test(&field, &value),
        _ => false,
    }
}

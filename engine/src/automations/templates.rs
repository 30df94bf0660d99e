// Built-in rule templates.
//
// Parameterised starting points for the most common automations; the API
// surface exposes them through `create_rule_from_template`.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use relay_shared::{Action, ActionConfig, Rule, Trigger};

use crate::error::{EngineError, EngineResult};

pub const TEMPLATES: [&str; 4] = [
    "event_notification",
    "webhook_relay",
    "auto_assignment",
    "daily_digest",
];

/// Instantiate a named template with its per-tenant parameters.
pub fn build_rule(
    template: &str,
    config: &Value,
    tenant_id: Uuid,
    created_by: &str,
) -> EngineResult<Rule> {
    match template {
        "event_notification" => {
            let event_type = required_str(config, "event_type")?;
            let recipients = required_str_list(config, "recipients")?;
            let title = optional_str(config, "title", &format!("Event: {event_type}"));
            let message = optional_str(config, "message", "{{event_type}} fired");
            Ok(Rule::new(tenant_id, &format!("Notify on {event_type}"))
                .with_description("Notify users whenever the event fires")
                .with_trigger(Trigger::event(&event_type))
                .with_action(Action::notify(
                    recipients.iter().map(String::as_str).collect(),
                    &title,
                    &message,
                ))
                .created_by(created_by))
        }

        "webhook_relay" => {
            let event_type = required_str(config, "event_type")?;
            let url = required_str(config, "url")?;
            Ok(Rule::new(tenant_id, &format!("Relay {event_type}"))
                .with_description("Forward the event payload to an external endpoint")
                .with_trigger(Trigger::event(&event_type))
                .with_action(Action::new(
                    "Relay payload",
                    // No configured payload: the executor forwards the
                    // trigger data itself.
                    ActionConfig::Webhook {
                        url,
                        method: "POST".to_string(),
                        headers: HashMap::new(),
                        auth: None,
                        payload: None,
                    },
                ))
                .created_by(created_by))
        }

        "auto_assignment" => {
            let event_type = required_str(config, "event_type")?;
            let assignees = required_str_list(config, "assignees")?;
            let entity_field = optional_str(config, "entity_field", "entity_id");
            Ok(Rule::new(tenant_id, &format!("Auto-assign on {event_type}"))
                .with_description("Assign the triggering entity to a fixed set of users")
                .with_trigger(Trigger::event(&event_type))
                .with_action(Action::assign(
                    &format!("{{{{{entity_field}}}}}"),
                    assignees.iter().map(String::as_str).collect(),
                ))
                .created_by(created_by))
        }

        "daily_digest" => {
            let recipients = required_str_list(config, "recipients")?;
            let interval = optional_str(config, "interval", "1d");
            Ok(Rule::new(tenant_id, "Daily digest")
                .with_description("Periodic reminder notification")
                .with_trigger(Trigger::interval(&interval))
                .with_action(Action::notify(
                    recipients.iter().map(String::as_str).collect(),
                    "Daily digest",
                    "Your scheduled digest is ready",
                ))
                .created_by(created_by))
        }

        other => Err(EngineError::TemplateNotFound(other.to_string())),
    }
}

fn required_str(config: &Value, key: &str) -> EngineResult<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| EngineError::Validation(format!("template config is missing '{key}'")))
}

fn optional_str(config: &Value, key: &str, default: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .map_or_else(|| default.to_string(), String::from)
}

fn required_str_list(config: &Value, key: &str) -> EngineResult<Vec<String>> {
    let values = config
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::Validation(format!("template config is missing '{key}'")))?;
    let list: Vec<String> = values
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect();
    if list.is_empty() {
        return Err(EngineError::Validation(format!(
            "template config '{key}' must list at least one entry"
        )));
    }
    Ok(list)
}

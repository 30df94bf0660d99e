// Action execution: dispatches one action to its collaborator.
//
// Config strings support `{{dot.path}}` interpolation against the trigger
// payload and execution context. Unresolved tokens stay verbatim so the gap
// is visible in the delivered output instead of silently blanked.

use regex::Regex;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

use relay_shared::{
    Action, ActionConfig, DatabaseOperation, ExecutionContext, FileOperationKind, WebhookAuth,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::services::EngineServices;

use super::conditions;

/// Runs a single action against the collaborator matching its kind.
#[derive(Clone)]
pub struct ActionExecutor {
    services: EngineServices,
    http_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(services: EngineServices, config: &EngineConfig) -> Self {
        Self {
            services,
            http_timeout: Duration::from_secs(config.http_timeout_secs),
        }
    }

    /// Execute one action. Collaborator failures come back as
    /// `ActionExecution` errors; the orchestrator records them on the step.
    pub async fn execute(
        &self,
        action: &Action,
        trigger_data: &Value,
        context: &ExecutionContext,
    ) -> EngineResult<Value> {
        info!(action = %action.name, kind = action.config.kind(), "Executing action");

        match &action.config {
            ActionConfig::Notification {
                recipients,
                title,
                message,
                channels,
            } => {
                let title = render_template(title, trigger_data, context);
                let message = render_template(message, trigger_data, context);
                for recipient in recipients {
                    self.services
                        .notifications
                        .send(recipient, &title, &message, trigger_data, channels)
                        .await
                        .map_err(|e| EngineError::action(&action.name, e))?;
                }
                Ok(json!({
                    "notified": recipients.len(),
                    "recipients": recipients,
                }))
            }

            ActionConfig::Email { to, subject, body } => {
                let to = render_template(to, trigger_data, context);
                let subject = render_template(subject, trigger_data, context);
                let body = render_template(body, trigger_data, context);
                self.services
                    .email
                    .send(&to, &subject, &body)
                    .await
                    .map_err(|e| EngineError::action(&action.name, e))?;
                Ok(json!({ "sent_to": to, "subject": subject }))
            }

            ActionConfig::Webhook {
                url,
                method,
                headers,
                auth,
                payload,
            } => {
                let url = render_template(url, trigger_data, context);
                let body = payload
                    .as_ref()
                    .map(|p| render_value(p, trigger_data, context))
                    .unwrap_or_else(|| trigger_data.clone());

                let client = reqwest::Client::new();
                let mut request = match method.to_uppercase().as_str() {
                    "GET" => client.get(&url),
                    "POST" => client.post(&url),
                    "PUT" => client.put(&url),
                    "PATCH" => client.patch(&url),
                    "DELETE" => client.delete(&url),
                    other => {
                        return Err(EngineError::action(
                            &action.name,
                            format!("unsupported HTTP method '{other}'"),
                        ));
                    }
                };
                request = request.timeout(self.http_timeout);
                for (key, value) in headers {
                    request = request.header(key, render_template(value, trigger_data, context));
                }
                request = match auth {
                    Some(WebhookAuth::Bearer { token }) => request.bearer_auth(token),
                    Some(WebhookAuth::Basic { username, password }) => {
                        request.basic_auth(username, Some(password))
                    }
                    Some(WebhookAuth::Header { name, value }) => request.header(name, value),
                    None => request,
                };
                if !matches!(method.to_uppercase().as_str(), "GET" | "DELETE") {
                    request = request.json(&body);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| EngineError::action(&action.name, e))?;
                let status = response.status().as_u16();
                let text = response
                    .text()
                    .await
                    .map_err(|e| EngineError::action(&action.name, e))?;
                if status >= 400 {
                    return Err(EngineError::action(
                        &action.name,
                        format!("webhook returned status {status}"),
                    ));
                }
                let parsed: Value =
                    serde_json::from_str(&text).unwrap_or(Value::String(text));
                Ok(json!({ "status_code": status, "response": parsed }))
            }

            ActionConfig::Database {
                operation,
                collection,
                values,
                filter,
            } => {
                let values = values.as_ref().map(|v| render_value(v, trigger_data, context));
                let filter = filter
                    .as_ref()
                    .map(|f| render_value(f, trigger_data, context))
                    .unwrap_or_else(|| json!({}));

                match operation {
                    DatabaseOperation::Insert => {
                        let values = values.ok_or_else(|| {
                            EngineError::action(&action.name, "insert requires values")
                        })?;
                        let inserted = self
                            .services
                            .data
                            .insert(collection, &values)
                            .await
                            .map_err(|e| EngineError::action(&action.name, e))?;
                        Ok(json!({ "inserted": inserted }))
                    }
                    DatabaseOperation::Update => {
                        let values = values.ok_or_else(|| {
                            EngineError::action(&action.name, "update requires values")
                        })?;
                        let updated = self
                            .services
                            .data
                            .update(collection, &filter, &values)
                            .await
                            .map_err(|e| EngineError::action(&action.name, e))?;
                        Ok(json!({ "updated": updated }))
                    }
                    DatabaseOperation::Delete => {
                        let deleted = self
                            .services
                            .data
                            .delete(collection, &filter)
                            .await
                            .map_err(|e| EngineError::action(&action.name, e))?;
                        Ok(json!({ "deleted": deleted }))
                    }
                    DatabaseOperation::Select => {
                        let rows = self
                            .services
                            .data
                            .select(collection, &filter)
                            .await
                            .map_err(|e| EngineError::action(&action.name, e))?;
                        Ok(json!({ "count": rows.len(), "rows": rows }))
                    }
                }
            }

            ActionConfig::FileOperation {
                operation,
                source,
                destination,
            } => {
                let source = render_template(source, trigger_data, context);
                let destination = destination
                    .as_ref()
                    .map(|d| render_template(d, trigger_data, context));
                let files = &self.services.files;

                match operation {
                    FileOperationKind::Move | FileOperationKind::Copy | FileOperationKind::Rename => {
                        let destination = destination.ok_or_else(|| {
                            EngineError::action(&action.name, "file operation requires a destination")
                        })?;
                        let result = match operation {
                            FileOperationKind::Move => files.move_item(&source, &destination).await,
                            FileOperationKind::Copy => files.copy_item(&source, &destination).await,
                            _ => files.rename_item(&source, &destination).await,
                        };
                        result.map_err(|e| EngineError::action(&action.name, e))?;
                        Ok(json!({ "source": source, "destination": destination }))
                    }
                    FileOperationKind::Delete => {
                        files
                            .delete_item(&source)
                            .await
                            .map_err(|e| EngineError::action(&action.name, e))?;
                        Ok(json!({ "deleted": source }))
                    }
                }
            }

            ActionConfig::Workflow { workflow_id, input } => {
                let mut merged = trigger_data.clone();
                let input = render_value(input, trigger_data, context);
                if let (Some(target), Some(extra)) = (merged.as_object_mut(), input.as_object()) {
                    for (k, v) in extra {
                        target.insert(k.clone(), v.clone());
                    }
                }
                let run_id = self
                    .services
                    .workflows
                    .start(workflow_id, &merged)
                    .await
                    .map_err(|e| EngineError::action(&action.name, e))?;
                Ok(json!({ "workflow_id": workflow_id, "run_id": run_id }))
            }

            ActionConfig::Assignment { entity_id, assignees } => {
                let entity_id = render_template(entity_id, trigger_data, context);
                let assigned = self
                    .services
                    .assignments
                    .assign(&entity_id, assignees)
                    .await
                    .map_err(|e| EngineError::action(&action.name, e))?;
                Ok(json!({ "entity_id": entity_id, "assigned": assigned }))
            }

            // Custom actions are an opaque external invocation; this engine
            // does not run them.
            ActionConfig::Custom { handler, .. } => {
                Err(EngineError::UnknownActionType(format!("custom:{handler}")))
            }
        }
    }
}

/// Replace `{{path}}` tokens with values from the trigger payload or the
/// execution context. Unresolved tokens are left verbatim.
pub fn render_template(template: &str, trigger_data: &Value, context: &ExecutionContext) -> String {
    let re = Regex::new(r"\{\{([^}]+)\}\}").unwrap();
    let mut result = template.to_string();

    for cap in re.captures_iter(template) {
        let path = cap[1].trim();
        if let Some(value) = lookup(path, trigger_data, context) {
            let replacement = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            result = result.replace(&cap[0], &replacement);
        }
    }

    result
}

/// Recursively interpolate every string in a JSON value.
pub fn render_value(value: &Value, trigger_data: &Value, context: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => Value::String(render_template(s, trigger_data, context)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, trigger_data, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, trigger_data, context))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup(path: &str, trigger_data: &Value, context: &ExecutionContext) -> Option<Value> {
    if let Some(value) = conditions::resolve_path(trigger_data, path) {
        return Some(value.clone());
    }
    match path {
        "user_id" => context.user_id.clone().map(Value::String),
        "entity_type" => context.entity_type.clone().map(Value::String),
        "entity_id" => context.entity_id.clone().map(Value::String),
        other => context.metadata.get(other).cloned(),
    }
}

// Shared data model for the Relay automation platform.
//
// These types are the wire format between the API surface, the automation
// engine and the stores: rules (triggers + conditions + actions), execution
// records and their per-step audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ===== Rules =====

/// A tenant-scoped automation rule: when one of its triggers fires and its
/// conditions pass, its actions run in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Higher priority rules run first when several match the same trigger.
    pub priority: i32,
    pub is_active: bool,
    pub triggers: Vec<Trigger>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub settings: RuleSettings,
    pub metadata: RuleMetadata,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Rule {
    pub fn new(tenant_id: Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            description: None,
            priority: 0,
            is_active: true,
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            settings: RuleSettings::default(),
            metadata: RuleMetadata::default(),
            created_by: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_settings(mut self, settings: RuleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn created_by(mut self, user: &str) -> Self {
        self.created_by = Some(user.to_string());
        self
    }

    /// A rule can only ever fire if at least one of its triggers is enabled.
    pub fn has_enabled_trigger(&self) -> bool {
        self.triggers.iter().any(|t| t.enabled)
    }

    /// Enabled actions in execution order. `order` ties keep list position.
    pub fn ordered_actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().filter(|a| a.enabled).collect();
        actions.sort_by_key(|a| a.order);
        actions
    }
}

/// Per-rule execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSettings {
    /// Daily execution quota. `None` means unlimited.
    pub max_executions_per_day: Option<u32>,
    /// Minimum seconds between two executions of the same rule. 0 disables.
    pub cooldown_seconds: u64,
    /// Extra attempts for a failed action before its step is recorded failed.
    pub retry_attempts: u32,
    /// Overall execution timeout.
    pub timeout_seconds: u64,
    /// Run actions concurrently instead of in ascending `order`.
    pub run_in_parallel: bool,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            max_executions_per_day: None,
            cooldown_seconds: 0,
            retry_attempts: 0,
            timeout_seconds: 30,
            run_in_parallel: false,
        }
    }
}

/// Bookkeeping updated by the engine after every execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleMetadata {
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub execution_count: u64,
    /// Rolling success rate in percent (0 to 100).
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

// ===== Triggers =====

/// An event source that can start a rule's evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub enabled: bool,
    #[serde(flatten)]
    pub config: TriggerConfig,
}

impl Trigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: true,
            config,
        }
    }

    pub fn event(event_type: &str) -> Self {
        Self::new(TriggerConfig::Event {
            event_type: event_type.to_string(),
        })
    }

    pub fn interval(expression: &str) -> Self {
        Self::new(TriggerConfig::Schedule {
            schedule: ScheduleKind::Interval,
            expression: expression.to_string(),
            timezone: None,
        })
    }

    pub fn cron(expression: &str, timezone: Option<&str>) -> Self {
        Self::new(TriggerConfig::Schedule {
            schedule: ScheduleKind::Cron,
            expression: expression.to_string(),
            timezone: timezone.map(|tz| tz.to_string()),
        })
    }

    pub fn webhook(webhook_id: &str) -> Self {
        Self::new(TriggerConfig::Webhook {
            webhook_id: webhook_id.to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            secret: None,
        })
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Trigger variants. Exactly one variant's config is populated per trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fires when a named platform event is dispatched.
    Event { event_type: String },
    /// Fires on a schedule: cron expression or `"<n><m|h|d>"` interval.
    Schedule {
        schedule: ScheduleKind,
        expression: String,
        timezone: Option<String>,
    },
    /// Fires when an inbound webhook call is routed to `webhook_id`.
    Webhook {
        webhook_id: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        secret: Option<String>,
    },
    /// Polls a condition on an interval and fires while it holds.
    Condition { condition: Condition, interval: String },
    /// Fired only by an explicit `execute_rule` call.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Interval,
}

// ===== Conditions =====

/// A single predicate over trigger data. `field` supports dot notation for
/// nested lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
    /// How this condition combines into its chain. Defaults to `and`.
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    /// Conditions sharing a group label are combined among themselves first;
    /// every group result is then AND-ed into the ungrouped result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Exists,
    NotExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
            logical_operator: LogicalOperator::And,
            group: None,
        }
    }

    pub fn equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, serde_json::json!(value))
    }

    pub fn in_list(field: &str, values: Vec<serde_json::Value>) -> Self {
        Self::new(field, ConditionOperator::In, serde_json::Value::Array(values))
    }

    pub fn exists(field: &str) -> Self {
        Self::new(field, ConditionOperator::Exists, serde_json::Value::Null)
    }

    pub fn or(mut self) -> Self {
        self.logical_operator = LogicalOperator::Or;
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }
}

// ===== Actions =====

/// One unit of work performed when a rule's conditions pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub config: ActionConfig,
    /// Execution position; ties keep list order.
    pub order: i32,
    pub enabled: bool,
    /// Keep running later actions when this one fails.
    pub continue_on_error: bool,
}

/// Typed per-kind action configuration. Adding a kind extends this enum and
/// the executor's match, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum ActionConfig {
    Notification {
        recipients: Vec<String>,
        title: String,
        message: String,
        #[serde(default)]
        channels: Vec<NotificationChannel>,
    },
    Email {
        to: String,
        subject: String,
        body: String,
    },
    Webhook {
        url: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        auth: Option<WebhookAuth>,
        payload: Option<serde_json::Value>,
    },
    Database {
        operation: DatabaseOperation,
        collection: String,
        values: Option<serde_json::Value>,
        filter: Option<serde_json::Value>,
    },
    FileOperation {
        operation: FileOperationKind,
        source: String,
        destination: Option<String>,
    },
    Workflow {
        workflow_id: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    Assignment {
        entity_id: String,
        assignees: Vec<String>,
    },
    Custom {
        handler: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl ActionConfig {
    /// Stable name of the action kind, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::Email { .. } => "email",
            Self::Webhook { .. } => "webhook",
            Self::Database { .. } => "database",
            Self::FileOperation { .. } => "file_operation",
            Self::Workflow { .. } => "workflow",
            Self::Assignment { .. } => "assignment",
            Self::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
    Sms,
    Slack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseOperation {
    Insert,
    Update,
    Delete,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperationKind {
    Move,
    Copy,
    Delete,
    Rename,
}

impl Action {
    pub fn new(name: &str, config: ActionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            config,
            order: 0,
            enabled: true,
            continue_on_error: false,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    // ===== Action Builders =====

    pub fn notify(recipients: Vec<&str>, title: &str, message: &str) -> Self {
        Self::new(
            "Send Notification",
            ActionConfig::Notification {
                recipients: recipients.into_iter().map(String::from).collect(),
                title: title.to_string(),
                message: message.to_string(),
                channels: vec![NotificationChannel::InApp],
            },
        )
    }

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::new(
            "Send Email",
            ActionConfig::Email {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            },
        )
    }

    pub fn send_webhook(url: &str, payload: serde_json::Value) -> Self {
        Self::new(
            "Send Webhook",
            ActionConfig::Webhook {
                url: url.to_string(),
                method: "POST".to_string(),
                headers: HashMap::new(),
                auth: None,
                payload: Some(payload),
            },
        )
    }

    pub fn assign(entity_id: &str, assignees: Vec<&str>) -> Self {
        Self::new(
            "Assign",
            ActionConfig::Assignment {
                entity_id: entity_id.to_string(),
                assignees: assignees.into_iter().map(String::from).collect(),
            },
        )
    }

    pub fn start_workflow(workflow_id: &str, input: serde_json::Value) -> Self {
        Self::new(
            "Start Workflow",
            ActionConfig::Workflow {
                workflow_id: workflow_id.to_string(),
                input,
            },
        )
    }

    pub fn database(operation: DatabaseOperation, collection: &str, values: serde_json::Value) -> Self {
        Self::new(
            "Database Operation",
            ActionConfig::Database {
                operation,
                collection: collection.to_string(),
                values: Some(values),
                filter: None,
            },
        )
    }
}

// ===== Executions =====

/// One run of one rule, with its per-step audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub tenant_id: Uuid,
    /// Free-text provenance, e.g. `event:file.uploaded` or `schedule:<id>`.
    pub triggered_by: String,
    pub triggered_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub trigger_data: serde_json::Value,
    pub context: ExecutionContext,
    pub steps: Vec<ExecutionStep>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Execution {
    pub fn new(rule: &Rule, triggered_by: &str, trigger_data: serde_json::Value, context: ExecutionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            tenant_id: rule.tenant_id,
            triggered_by: triggered_by.to_string(),
            triggered_at: Utc::now(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            trigger_data,
            context,
            steps: Vec::new(),
            error: None,
            result: None,
        }
    }

    /// Move to a new status. Terminal states are never overwritten.
    pub fn transition(&mut self, status: ExecutionStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Finalize with a terminal status and stamp completion time + duration.
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.transition(status);
        let completed = Utc::now();
        self.completed_at = Some(completed);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((completed - started).num_milliseconds());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

/// Context snapshot captured when an execution is created.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionContext {
    pub user_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The record of one action's attempt within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: Uuid,
    pub step_type: StepType,
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutionStep {
    pub fn running(step_type: StepType, name: &str, input: Option<serde_json::Value>) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            step_type,
            name: name.to_string(),
            status: StepStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_ms: None,
            input,
            output: None,
            error: None,
        }
    }

    pub fn complete(&mut self, output: Option<serde_json::Value>) {
        self.finish(StepStatus::Completed);
        self.output = output;
    }

    pub fn fail(&mut self, error: &str) {
        self.finish(StepStatus::Failed);
        self.error = Some(error.to_string());
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        let completed = Utc::now();
        self.completed_at = Some(completed);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((completed - started).num_milliseconds());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Condition,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

// ===== Metrics =====

/// Half-open time window used when listing executions for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl MetricsPeriod {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn last_days(days: i64) -> Self {
        let to = Utc::now();
        Self {
            from: to - chrono::Duration::days(days),
            to,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }
}

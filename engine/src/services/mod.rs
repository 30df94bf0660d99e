// Collaborator interfaces consumed by the automation engine.
//
// Persistence, notification delivery and entity mutation are owned by the
// surrounding platform; the engine only talks to these traits. Production
// wires real stores, tests (and the standalone engine) use the in-memory
// implementations from [`memory`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use relay_shared::{Execution, MetricsPeriod, NotificationChannel, Rule};

pub mod memory;

/// The collaborators one engine instance is wired with.
#[derive(Clone)]
pub struct EngineServices {
    pub rules: Arc<dyn RuleStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub notifications: Arc<dyn NotificationSender>,
    pub email: Arc<dyn EmailSender>,
    pub data: Arc<dyn DataStore>,
    pub files: Arc<dyn FileStore>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub assignments: Arc<dyn AssignmentStore>,
}

impl EngineServices {
    /// Fully in-memory wiring: the default for tests and for running the
    /// engine standalone.
    pub fn in_memory() -> Self {
        Self {
            rules: Arc::new(memory::InMemoryRuleStore::new()),
            executions: Arc::new(memory::InMemoryExecutionStore::new()),
            notifications: Arc::new(memory::RecordingNotificationSender::new()),
            email: Arc::new(memory::RecordingEmailSender::new()),
            data: Arc::new(memory::InMemoryDataStore::new()),
            files: Arc::new(memory::RecordingFileStore::new()),
            workflows: Arc::new(memory::RecordingWorkflowStore::new()),
            assignments: Arc::new(memory::RecordingAssignmentStore::new()),
        }
    }
}

/// Rule persistence.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get(&self, rule_id: Uuid) -> anyhow::Result<Option<Rule>>;
    async fn list(&self, tenant_id: Uuid) -> anyhow::Result<Vec<Rule>>;
    async fn create(&self, rule: Rule) -> anyhow::Result<Rule>;
    async fn update(&self, rule: Rule) -> anyhow::Result<Rule>;
}

/// Execution history persistence.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: Execution) -> anyhow::Result<()>;
    async fn update(&self, execution: Execution) -> anyhow::Result<()>;
    async fn list(&self, tenant_id: Uuid, period: MetricsPeriod) -> anyhow::Result<Vec<Execution>>;
    /// Number of executions of one rule on one calendar day (UTC).
    async fn count_executions(&self, rule_id: Uuid, day: NaiveDate) -> anyhow::Result<u64>;
}

/// In-app / multi-channel notification delivery.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        data: &Value,
        channels: &[NotificationChannel],
    ) -> anyhow::Result<()>;
}

/// Outbound email delivery.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Structured record mutation for `database` actions.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn insert(&self, collection: &str, values: &Value) -> anyhow::Result<Value>;
    async fn update(&self, collection: &str, filter: &Value, values: &Value) -> anyhow::Result<u64>;
    async fn delete(&self, collection: &str, filter: &Value) -> anyhow::Result<u64>;
    async fn select(&self, collection: &str, filter: &Value) -> anyhow::Result<Vec<Value>>;
}

/// File management for `file_operation` actions.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn move_item(&self, source: &str, destination: &str) -> anyhow::Result<()>;
    async fn copy_item(&self, source: &str, destination: &str) -> anyhow::Result<()>;
    async fn delete_item(&self, path: &str) -> anyhow::Result<()>;
    async fn rename_item(&self, source: &str, new_name: &str) -> anyhow::Result<()>;
}

/// Starts external workflows by id.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Returns the identifier of the started workflow run.
    async fn start(&self, workflow_id: &str, data: &Value) -> anyhow::Result<String>;
}

/// Assigns an entity to one or more users.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Returns how many assignees were applied.
    async fn assign(&self, entity_id: &str, assignees: &[String]) -> anyhow::Result<u32>;
}

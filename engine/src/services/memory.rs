// In-memory collaborator implementations.
//
// These back the engine's tests and serve as the default wiring for a
// standalone engine process. The recording variants keep what they were
// asked to do so tests can assert on it.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::RwLock;
use uuid::Uuid;

use relay_shared::{Execution, MetricsPeriod, NotificationChannel, Rule};

use super::{
    AssignmentStore, DataStore, EmailSender, ExecutionStore, FileStore, NotificationSender,
    RuleStore, WorkflowStore,
};

// ===== Rule store =====

#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<Uuid, Rule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn get(&self, rule_id: Uuid) -> anyhow::Result<Option<Rule>> {
        Ok(self.rules.read().await.get(&rule_id).cloned())
    }

    async fn list(&self, tenant_id: Uuid) -> anyhow::Result<Vec<Rule>> {
        Ok(self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn create(&self, rule: Rule) -> anyhow::Result<Rule> {
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, rule: Rule) -> anyhow::Result<Rule> {
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(rule)
    }
}

// ===== Execution store =====

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<Vec<Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, execution_id: Uuid) -> Option<Execution> {
        self.executions
            .read()
            .await
            .iter()
            .find(|e| e.id == execution_id)
            .cloned()
    }

    pub async fn all(&self) -> Vec<Execution> {
        self.executions.read().await.clone()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: Execution) -> anyhow::Result<()> {
        self.executions.write().await.push(execution);
        Ok(())
    }

    async fn update(&self, execution: Execution) -> anyhow::Result<()> {
        let mut executions = self.executions.write().await;
        match executions.iter_mut().find(|e| e.id == execution.id) {
            Some(existing) => *existing = execution,
            None => executions.push(execution),
        }
        Ok(())
    }

    async fn list(&self, tenant_id: Uuid, period: MetricsPeriod) -> anyhow::Result<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.tenant_id == tenant_id && period.contains(e.triggered_at))
            .cloned()
            .collect())
    }

    async fn count_executions(&self, rule_id: Uuid, day: NaiveDate) -> anyhow::Result<u64> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.rule_id == rule_id && e.triggered_at.date_naive() == day)
            .count() as u64)
    }
}

// ===== Notification sender =====

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub channels: Vec<NotificationChannel>,
}

#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        _data: &Value,
        channels: &[NotificationChannel],
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentNotification {
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            channels: channels.to_vec(),
        });
        Ok(())
    }
}

// ===== Email sender =====

#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Email sender that fails a configured number of times before succeeding.
/// Used to exercise retry and continue-on-error paths.
pub struct FlakyEmailSender {
    failures_remaining: Mutex<u32>,
    sent: Mutex<Vec<(String, String, String)>>,
}

impl FlakyEmailSender {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_remaining: Mutex::new(times),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Never recovers.
    pub fn broken() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for FlakyEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        {
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                anyhow::bail!("smtp connection refused");
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ===== Data store =====

#[derive(Default)]
pub struct InMemoryDataStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

/// True when every key in `filter` is present in `row` with an equal value.
fn matches_filter(row: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(fields) => fields.iter().all(|(k, v)| row.get(k) == Some(v)),
        None => true,
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn insert(&self, collection: &str, values: &Value) -> anyhow::Result<Value> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(values.clone());
        Ok(values.clone())
    }

    async fn update(&self, collection: &str, filter: &Value, values: &Value) -> anyhow::Result<u64> {
        let mut collections = self.collections.write().await;
        let rows = collections.entry(collection.to_string()).or_default();
        let mut updated = 0;
        for row in rows.iter_mut().filter(|r| matches_filter(r, filter)) {
            if let (Some(target), Some(patch)) = (row.as_object_mut(), values.as_object()) {
                for (k, v) in patch {
                    target.insert(k.clone(), v.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, collection: &str, filter: &Value) -> anyhow::Result<u64> {
        let mut collections = self.collections.write().await;
        let rows = collections.entry(collection.to_string()).or_default();
        let before = rows.len();
        rows.retain(|r| !matches_filter(r, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn select(&self, collection: &str, filter: &Value) -> anyhow::Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_filter(r, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ===== File store =====

#[derive(Default)]
pub struct RecordingFileStore {
    operations: Mutex<Vec<String>>,
}

impl RecordingFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    fn record(&self, op: String) {
        self.operations.lock().unwrap().push(op);
    }
}

#[async_trait]
impl FileStore for RecordingFileStore {
    async fn move_item(&self, source: &str, destination: &str) -> anyhow::Result<()> {
        self.record(format!("move {source} -> {destination}"));
        Ok(())
    }

    async fn copy_item(&self, source: &str, destination: &str) -> anyhow::Result<()> {
        self.record(format!("copy {source} -> {destination}"));
        Ok(())
    }

    async fn delete_item(&self, path: &str) -> anyhow::Result<()> {
        self.record(format!("delete {path}"));
        Ok(())
    }

    async fn rename_item(&self, source: &str, new_name: &str) -> anyhow::Result<()> {
        self.record(format!("rename {source} -> {new_name}"));
        Ok(())
    }
}

// ===== Workflow store =====

#[derive(Default)]
pub struct RecordingWorkflowStore {
    started: Mutex<Vec<(String, Value)>>,
}

impl RecordingWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<(String, Value)> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowStore for RecordingWorkflowStore {
    async fn start(&self, workflow_id: &str, data: &Value) -> anyhow::Result<String> {
        self.started
            .lock()
            .unwrap()
            .push((workflow_id.to_string(), data.clone()));
        Ok(Uuid::new_v4().to_string())
    }
}

// ===== Assignment store =====

#[derive(Default)]
pub struct RecordingAssignmentStore {
    assignments: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assignments(&self) -> Vec<(String, Vec<String>)> {
        self.assignments.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssignmentStore for RecordingAssignmentStore {
    async fn assign(&self, entity_id: &str, assignees: &[String]) -> anyhow::Result<u32> {
        self.assignments
            .lock()
            .unwrap()
            .push((entity_id.to_string(), assignees.to_vec()));
        Ok(assignees.len() as u32)
    }
}

// Execution orchestration and the engine facade.
//
// `AutomationEngine` owns the trigger registry, rate limiter and action
// executor, and drives the execution state machine:
// pending -> running -> {completed, failed, cancelled, timeout}.
//
// Errors before an execution record exists (lookup, rate limit) propagate
// to the caller. Once the record is created, action failures are captured
// into step records and finalize the execution instead of propagating, so
// one rule's failure never blocks dispatch to its siblings.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use relay_shared::{
    Action, Execution, ExecutionContext, ExecutionStatus, ExecutionStep, MetricsPeriod, Rule,
    StepType, TriggerConfig,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::services::EngineServices;

use super::conditions;
use super::executor::ActionExecutor;
use super::metrics::{self, AutomationMetrics};
use super::rate_limit::RateLimiter;
use super::scheduler::TriggerScheduler;
use super::templates;
use super::triggers::TriggerRegistry;

enum ActionOutcome {
    Completed(Value),
    Failed(String),
    TimedOut,
}

enum RunFailure {
    Failed(String),
    TimedOut,
}

pub struct AutomationEngine {
    config: EngineConfig,
    services: EngineServices,
    registry: TriggerRegistry,
    rate_limiter: RateLimiter,
    executor: ActionExecutor,
    scheduler: RwLock<Option<TriggerScheduler>>,
}

impl AutomationEngine {
    pub fn new(config: EngineConfig, services: EngineServices) -> Arc<Self> {
        let rate_limiter = RateLimiter::new(services.executions.clone());
        let executor = ActionExecutor::new(services.clone(), &config);
        Arc::new(Self {
            config,
            services,
            registry: TriggerRegistry::new(),
            rate_limiter,
            executor,
            scheduler: RwLock::new(None),
        })
    }

    /// Engine with default config and in-memory collaborators.
    pub fn in_memory() -> Arc<Self> {
        Self::new(EngineConfig::default(), EngineServices::in_memory())
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    // ===== Rule management =====

    pub async fn create_rule(&self, rule: Rule) -> EngineResult<Rule> {
        if rule.name.trim().is_empty() {
            return Err(EngineError::Validation("rule name must not be empty".to_string()));
        }
        if !rule.has_enabled_trigger() {
            warn!(rule_id = %rule.id, "Rule has no enabled trigger and will never fire");
        }

        let rule = self.services.rules.create(rule).await?;
        self.register_rule(&rule).await;
        info!(rule_id = %rule.id, rule_name = %rule.name, "Automation rule created");
        Ok(rule)
    }

    /// Instantiate one of the built-in rule templates and create it.
    pub async fn create_rule_from_template(
        &self,
        template: &str,
        config: &Value,
        tenant_id: Uuid,
        created_by: &str,
    ) -> EngineResult<Rule> {
        let rule = templates::build_rule(template, config, tenant_id, created_by)?;
        self.create_rule(rule).await
    }

    /// Index a rule's triggers; cron schedules are armed once a scheduler
    /// is running.
    pub async fn register_rule(&self, rule: &Rule) {
        self.registry.register_rule(rule).await;
        if let Some(scheduler) = self.scheduler.read().await.as_ref() {
            for spec in self.registry.cron_specs().await {
                if spec.rule_id != rule.id {
                    continue;
                }
                if let Err(e) = scheduler.arm_cron(&spec).await {
                    warn!(rule_id = %spec.rule_id, trigger_id = %spec.trigger_id, error = %e,
                          "Cron trigger not armed");
                }
            }
        }
    }

    pub async fn unregister_rule(&self, rule_id: Uuid) {
        self.registry.unregister_rule(rule_id).await;
        if let Some(scheduler) = self.scheduler.read().await.as_ref() {
            scheduler.disarm_rule(rule_id).await;
        }
    }

    // ===== Dispatch =====

    /// Dispatch a platform event to every matching active rule, highest
    /// priority first. Fire-and-forget per rule: one rule's failure is
    /// logged and does not block the others. Returns the executions created.
    pub async fn trigger_event(
        &self,
        event_type: &str,
        data: Value,
        context: ExecutionContext,
    ) -> Vec<Uuid> {
        let candidates = self.registry.rules_for_event(event_type).await;
        let rules = self.load_by_priority(candidates).await;
        debug!(event_type, matches = rules.len(), "Dispatching event");

        let mut executed = Vec::new();
        for rule in rules {
            let triggered_by = format!("event:{event_type}");
            match self
                .run_rule(rule.id, data.clone(), context.clone(), triggered_by)
                .await
            {
                Ok(id) => executed.push(id),
                Err(e) => warn!(rule_id = %rule.id, error = %e, "Rule dispatch failed"),
            }
        }
        executed
    }

    /// Dispatch an inbound webhook call to every rule listening on this
    /// webhook id. Rules whose trigger carries a secret are skipped unless
    /// the `x-relay-token` header matches.
    pub async fn handle_webhook_trigger(
        &self,
        webhook_id: &str,
        data: Value,
        headers: HashMap<String, String>,
    ) -> Vec<Uuid> {
        let candidates = self.registry.rules_for_webhook(webhook_id).await;
        let rules = self.load_by_priority(candidates).await;

        let mut executed = Vec::new();
        for rule in rules {
            if !webhook_authorized(&rule, webhook_id, &headers) {
                warn!(rule_id = %rule.id, webhook_id, "Webhook token mismatch, skipping rule");
                continue;
            }
            let mut context = ExecutionContext::default();
            context
                .metadata
                .insert("webhook_id".to_string(), json!(webhook_id));
            context
                .metadata
                .insert("webhook_headers".to_string(), json!(headers.clone()));

            match self
                .run_rule(rule.id, data.clone(), context, format!("webhook:{webhook_id}"))
                .await
            {
                Ok(id) => executed.push(id),
                Err(e) => warn!(rule_id = %rule.id, error = %e, "Webhook dispatch failed"),
            }
        }
        executed
    }

    /// Fire interval and condition-poll triggers that are due now.
    pub async fn tick(&self) -> Vec<Uuid> {
        self.tick_at(Utc::now()).await
    }

    /// Fire triggers due at a given instant. Split out from [`tick`] so
    /// schedule behavior is testable without waiting.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let due = self.registry.due_triggers(now).await;
        let mut executed = Vec::new();
        for fired in due {
            if let Some(gate) = &fired.gate {
                if !conditions::evaluate_condition(gate, &json!({})) {
                    debug!(rule_id = %fired.rule_id, "Poll condition not met");
                    continue;
                }
            }
            match self
                .run_rule(
                    fired.rule_id,
                    json!({}),
                    ExecutionContext::default(),
                    fired.triggered_by.clone(),
                )
                .await
            {
                Ok(id) => executed.push(id),
                Err(e) => warn!(rule_id = %fired.rule_id, error = %e, "Scheduled execution failed"),
            }
        }
        executed
    }

    /// Start the background scheduler: a driver job for interval triggers
    /// plus one cron job per cron-type schedule trigger registered so far.
    pub async fn setup_scheduled_triggers(self: &Arc<Self>) -> EngineResult<()> {
        let scheduler = TriggerScheduler::new(Arc::downgrade(self)).await?;
        scheduler.start(self.config.tick_interval_secs).await?;
        for spec in self.registry.cron_specs().await {
            if let Err(e) = scheduler.arm_cron(&spec).await {
                warn!(rule_id = %spec.rule_id, trigger_id = %spec.trigger_id, error = %e,
                      "Cron trigger not armed");
            }
        }
        *self.scheduler.write().await = Some(scheduler);
        info!("Scheduled triggers armed");
        Ok(())
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        if let Some(scheduler) = self.scheduler.write().await.take() {
            scheduler.shutdown().await?;
        }
        Ok(())
    }

    // ===== Execution =====

    /// Run one rule now. The returned id identifies the execution record;
    /// its terminal status (completed, failed, timeout) is in the record,
    /// not in this result.
    pub async fn execute_rule(
        &self,
        rule_id: Uuid,
        trigger_data: Value,
        context: ExecutionContext,
    ) -> EngineResult<Uuid> {
        self.run_rule(rule_id, trigger_data, context, "manual".to_string())
            .await
    }

    pub(crate) async fn run_scheduled(&self, rule_id: Uuid, triggered_by: String) -> EngineResult<Uuid> {
        self.run_rule(rule_id, json!({}), ExecutionContext::default(), triggered_by)
            .await
    }

    async fn run_rule(
        &self,
        rule_id: Uuid,
        trigger_data: Value,
        context: ExecutionContext,
        triggered_by: String,
    ) -> EngineResult<Uuid> {
        let rule = self
            .services
            .rules
            .get(rule_id)
            .await?
            .ok_or(EngineError::RuleNotFound(rule_id))?;
        if !rule.is_active {
            return Err(EngineError::RuleInactive(rule_id));
        }
        self.rate_limiter.check(&rule).await?;

        let mut execution = Execution::new(&rule, &triggered_by, trigger_data, context);
        execution.started_at = Some(Utc::now());
        execution.transition(ExecutionStatus::Running);
        self.services.executions.create(execution.clone()).await?;
        let execution_id = execution.id;

        if !rule.conditions.is_empty() {
            if conditions::evaluate_conditions(&rule.conditions, &execution.trigger_data) {
                let mut step =
                    ExecutionStep::running(StepType::Condition, "Evaluate conditions", None);
                step.complete(Some(json!({ "matched": true })));
                execution.steps.push(step);
            } else {
                // A non-match is a normal outcome, not a failure, and
                // records no steps.
                execution.result = Some(json!({ "skipped": true, "reason": "Conditions not met" }));
                execution.finish(ExecutionStatus::Completed);
                self.services.executions.update(execution.clone()).await?;
                self.update_rule_metadata(rule, &execution).await;
                debug!(execution_id = %execution_id, "Conditions not met, execution skipped");
                return Ok(execution_id);
            }
        }

        let deadline = Instant::now() + Duration::from_secs(rule.settings.timeout_seconds);
        let actions: Vec<Action> = rule.ordered_actions().into_iter().cloned().collect();

        if rule.settings.run_in_parallel {
            self.run_actions_parallel(&rule, &mut execution, actions, deadline)
                .await;
        } else {
            self.run_actions_sequential(&rule, &mut execution, actions, deadline)
                .await;
        }

        if !execution.status.is_terminal() {
            execution.finish(ExecutionStatus::Completed);
        }
        self.services.executions.update(execution.clone()).await?;
        self.update_rule_metadata(rule, &execution).await;

        info!(execution_id = %execution_id, status = ?execution.status, "Execution finished");
        Ok(execution_id)
    }

    async fn run_actions_sequential(
        &self,
        rule: &Rule,
        execution: &mut Execution,
        actions: Vec<Action>,
        deadline: Instant,
    ) {
        for action in actions {
            if Instant::now() >= deadline {
                execution.error = Some(format!(
                    "Execution timed out after {}s",
                    rule.settings.timeout_seconds
                ));
                execution.finish(ExecutionStatus::Timeout);
                warn!(execution_id = %execution.id, "Execution timed out before all actions ran");
                return;
            }

            execution.steps.push(ExecutionStep::running(
                StepType::Action,
                &action.name,
                Some(json!({ "type": action.config.kind() })),
            ));
            let step_index = execution.steps.len() - 1;

            let outcome = self
                .run_action_with_retry(
                    rule,
                    &action,
                    &execution.trigger_data,
                    &execution.context,
                    deadline,
                )
                .await;

            match outcome {
                ActionOutcome::Completed(output) => {
                    execution.steps[step_index].complete(Some(output));
                }
                ActionOutcome::TimedOut => {
                    execution.steps[step_index].fail("timed out");
                    execution.error = Some(format!(
                        "Execution timed out after {}s",
                        rule.settings.timeout_seconds
                    ));
                    execution.finish(ExecutionStatus::Timeout);
                    self.persist(execution).await;
                    return;
                }
                ActionOutcome::Failed(message) => {
                    execution.steps[step_index].fail(&message);
                    error!(execution_id = %execution.id, action = %action.name, error = %message,
                           "Action failed");
                    if !action.continue_on_error {
                        execution.error = Some(format!("Action failed: {}", action.name));
                        execution.finish(ExecutionStatus::Failed);
                        self.persist(execution).await;
                        return;
                    }
                }
            }
            self.persist(execution).await;
        }
    }

    async fn run_actions_parallel(
        &self,
        rule: &Rule,
        execution: &mut Execution,
        actions: Vec<Action>,
        deadline: Instant,
    ) {
        let step_offset = execution.steps.len();
        for action in &actions {
            execution.steps.push(ExecutionStep::running(
                StepType::Action,
                &action.name,
                Some(json!({ "type": action.config.kind() })),
            ));
        }
        self.persist(execution).await;

        let trigger_data = execution.trigger_data.clone();
        let context = execution.context.clone();
        let futures = actions.iter().map(|action| {
            self.run_action_with_retry(rule, action, &trigger_data, &context, deadline)
        });
        let outcomes = futures::future::join_all(futures).await;

        let mut failed_action: Option<String> = None;
        let mut timed_out = false;
        for (index, (action, outcome)) in actions.iter().zip(outcomes).enumerate() {
            let step = &mut execution.steps[step_offset + index];
            match outcome {
                ActionOutcome::Completed(output) => step.complete(Some(output)),
                ActionOutcome::TimedOut => {
                    step.fail("timed out");
                    timed_out = true;
                }
                ActionOutcome::Failed(message) => {
                    step.fail(&message);
                    error!(execution_id = %execution.id, action = %action.name, error = %message,
                           "Action failed");
                    if !action.continue_on_error && failed_action.is_none() {
                        failed_action = Some(action.name.clone());
                    }
                }
            }
        }

        if let Some(name) = failed_action {
            execution.error = Some(format!("Action failed: {name}"));
            execution.finish(ExecutionStatus::Failed);
        } else if timed_out {
            execution.error = Some(format!(
                "Execution timed out after {}s",
                rule.settings.timeout_seconds
            ));
            execution.finish(ExecutionStatus::Timeout);
        }
    }

    async fn run_action_with_retry(
        &self,
        rule: &Rule,
        action: &Action,
        trigger_data: &Value,
        context: &ExecutionContext,
        deadline: Instant,
    ) -> ActionOutcome {
        let mut attempt = 0;
        loop {
            match self
                .run_action_detached(action, trigger_data, context, deadline)
                .await
            {
                Ok(output) => return ActionOutcome::Completed(output),
                Err(RunFailure::TimedOut) => return ActionOutcome::TimedOut,
                Err(RunFailure::Failed(message)) => {
                    if attempt < rule.settings.retry_attempts {
                        attempt += 1;
                        warn!(action = %action.name, attempt,
                              max = rule.settings.retry_attempts, "Action failed, retrying");
                        let delay = Duration::from_secs(self.config.retry_delay_secs);
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        tokio::time::sleep(delay.min(remaining)).await;
                        continue;
                    }
                    return ActionOutcome::Failed(message);
                }
            }
        }
    }

    /// Run one action on a spawned task and wait for it up to the deadline.
    /// On timeout the task is left running; the engine only stops awaiting
    /// it, leaving idempotency to the action's collaborator.
    async fn run_action_detached(
        &self,
        action: &Action,
        trigger_data: &Value,
        context: &ExecutionContext,
        deadline: Instant,
    ) -> Result<Value, RunFailure> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RunFailure::TimedOut);
        }

        let executor = self.executor.clone();
        let action = action.clone();
        let trigger_data = trigger_data.clone();
        let context = context.clone();
        let handle =
            tokio::spawn(async move { executor.execute(&action, &trigger_data, &context).await });

        match tokio::time::timeout(remaining, handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(RunFailure::Failed(e.to_string())),
            Ok(Err(join_error)) => Err(RunFailure::Failed(format!(
                "action task aborted: {join_error}"
            ))),
            Err(_elapsed) => Err(RunFailure::TimedOut),
        }
    }

    async fn persist(&self, execution: &Execution) {
        if let Err(e) = self.services.executions.update(execution.clone()).await {
            warn!(execution_id = %execution.id, error = %e, "Failed to persist execution");
        }
    }

    async fn load_by_priority(&self, rule_ids: Vec<Uuid>) -> Vec<Rule> {
        let mut rules = Vec::new();
        for rule_id in rule_ids {
            match self.services.rules.get(rule_id).await {
                Ok(Some(rule)) if rule.is_active => rules.push(rule),
                Ok(_) => {}
                Err(e) => warn!(rule_id = %rule_id, error = %e, "Failed to load rule for dispatch"),
            }
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    async fn update_rule_metadata(&self, mut rule: Rule, execution: &Execution) {
        let previous = rule.metadata.execution_count as f64;
        let success = if execution.status == ExecutionStatus::Completed {
            100.0
        } else {
            0.0
        };
        rule.metadata.success_rate = if previous == 0.0 {
            success
        } else {
            (rule.metadata.success_rate * previous + success) / (previous + 1.0)
        };
        if let Some(duration) = execution.duration_ms {
            let duration = duration.max(0) as f64;
            rule.metadata.avg_execution_time_ms = if previous == 0.0 {
                duration
            } else {
                (rule.metadata.avg_execution_time_ms * previous + duration) / (previous + 1.0)
            };
        }
        rule.metadata.execution_count += 1;
        rule.metadata.last_executed_at = Some(Utc::now());
        rule.updated_at = Some(Utc::now());

        if let Err(e) = self.services.rules.update(rule).await {
            warn!(error = %e, "Failed to update rule metadata");
        }
    }

    // ===== Reporting =====

    pub async fn get_metrics(
        &self,
        tenant_id: Uuid,
        period: MetricsPeriod,
    ) -> EngineResult<AutomationMetrics> {
        let rules = self.services.rules.list(tenant_id).await?;
        let executions = self.services.executions.list(tenant_id, period).await?;
        Ok(metrics::aggregate(
            &rules,
            &executions,
            self.config.top_rules_limit,
        ))
    }
}

/// A webhook trigger with a secret only accepts calls carrying the matching
/// `x-relay-token` header.
fn webhook_authorized(rule: &Rule, webhook_id: &str, headers: &HashMap<String, String>) -> bool {
    rule.triggers
        .iter()
        .filter(|t| t.enabled)
        .any(|t| match &t.config {
            TriggerConfig::Webhook {
                webhook_id: id,
                secret,
                ..
            } if id == webhook_id => match secret {
                Some(expected) => headers.get("x-relay-token") == Some(expected),
                None => true,
            },
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::{
        FlakyEmailSender, InMemoryExecutionStore, RecordingAssignmentStore,
    };
    use relay_shared::{Condition, RuleSettings, StepStatus, Trigger};

    struct Harness {
        engine: Arc<AutomationEngine>,
        executions: Arc<InMemoryExecutionStore>,
        assignments: Arc<RecordingAssignmentStore>,
    }

    fn harness() -> Harness {
        harness_with(|services| services)
    }

    fn harness_with(customize: impl FnOnce(EngineServices) -> EngineServices) -> Harness {
        let executions = Arc::new(InMemoryExecutionStore::new());
        let assignments = Arc::new(RecordingAssignmentStore::new());
        let mut services = EngineServices::in_memory();
        services.executions = executions.clone();
        services.assignments = assignments.clone();
        let services = customize(services);
        Harness {
            engine: AutomationEngine::new(EngineConfig::default(), services),
            executions,
            assignments,
        }
    }

    fn tenant() -> Uuid {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn test_execute_unknown_rule_fails_fast() {
        let h = harness();
        let err = h
            .engine
            .execute_rule(Uuid::new_v4(), json!({}), ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuleNotFound(_)));
        assert!(h.executions.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_inactive_rule_fails_fast() {
        let h = harness();
        let mut rule = Rule::new(tenant(), "off").with_action(Action::assign("e", vec!["u"]));
        rule.is_active = false;
        let rule = h.engine.create_rule(rule).await.unwrap();

        let err = h
            .engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuleInactive(_)));
    }

    #[tokio::test]
    async fn test_conditions_not_met_records_no_steps() {
        let h = harness();
        let rule = Rule::new(tenant(), "guarded")
            .with_trigger(Trigger::event("ticket.created"))
            .with_condition(Condition::equals("priority", json!("critical")))
            .with_action(Action::assign("{{ticket_id}}", vec!["u1"]));
        let rule = h.engine.create_rule(rule).await.unwrap();

        let execution_id = h
            .engine
            .execute_rule(rule.id, json!({"priority": "low"}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = h.executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.steps.is_empty());
        assert_eq!(execution.result.unwrap()["skipped"], true);
        assert!(h.assignments.assignments().is_empty());
    }

    #[tokio::test]
    async fn test_successful_execution_completes_with_duration() {
        let h = harness();
        let rule = Rule::new(tenant(), "assign on upload")
            .with_trigger(Trigger::event("file.uploaded"))
            .with_action(Action::assign("{{file_id}}", vec!["u1"]));
        let rule = h.engine.create_rule(rule).await.unwrap();

        let execution_id = h
            .engine
            .execute_rule(rule.id, json!({"file_id": "f1"}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = h.executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.duration_ms.unwrap() >= 0);
        assert_eq!(execution.steps.len(), 1);
        let step = &execution.steps[0];
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.output.as_ref().unwrap()["assigned"], 1);
    }

    #[tokio::test]
    async fn test_execution_halts_after_failure_without_continue() {
        let h = harness_with(|mut services| {
            services.email = Arc::new(FlakyEmailSender::broken());
            services
        });
        let rule = Rule::new(tenant(), "halts")
            .with_trigger(Trigger::event("e"))
            .with_action(Action::send_email("a@x.com", "s", "b").with_order(0))
            .with_action(Action::assign("e1", vec!["u1"]).with_order(1));
        let rule = h.engine.create_rule(rule).await.unwrap();

        let execution_id = h
            .engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = h.executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("Action failed: Send Email"));
        // Only the failed step was recorded; the assignment never ran.
        assert_eq!(execution.steps.len(), 1);
        assert_eq!(execution.steps[0].status, StepStatus::Failed);
        assert!(h.assignments.assignments().is_empty());
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_running() {
        let h = harness_with(|mut services| {
            services.email = Arc::new(FlakyEmailSender::broken());
            services
        });
        let rule = Rule::new(tenant(), "continues")
            .with_trigger(Trigger::event("e"))
            .with_action(
                Action::send_email("a@x.com", "s", "b")
                    .with_order(0)
                    .continue_on_error(),
            )
            .with_action(Action::assign("e1", vec!["u1"]).with_order(1));
        let rule = h.engine.create_rule(rule).await.unwrap();

        let execution_id = h
            .engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = h.executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(execution.steps[0].status, StepStatus::Failed);
        assert_eq!(execution.steps[1].status, StepStatus::Completed);
        assert_eq!(h.assignments.assignments().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let email = Arc::new(FlakyEmailSender::failing(1));
        let executions = Arc::new(InMemoryExecutionStore::new());
        let mut services = EngineServices::in_memory();
        services.email = email.clone();
        services.executions = executions.clone();

        let config = EngineConfig {
            retry_delay_secs: 0,
            ..EngineConfig::default()
        };
        let engine = AutomationEngine::new(config, services);

        let rule = Rule::new(tenant(), "retries")
            .with_trigger(Trigger::event("e"))
            .with_settings(RuleSettings {
                retry_attempts: 2,
                ..RuleSettings::default()
            })
            .with_action(Action::send_email("a@x.com", "s", "b"));
        let rule = engine.create_rule(rule).await.unwrap();

        let execution_id = engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_execution_completes_all_steps() {
        let h = harness();
        let rule = Rule::new(tenant(), "parallel")
            .with_trigger(Trigger::event("e"))
            .with_settings(RuleSettings {
                run_in_parallel: true,
                ..RuleSettings::default()
            })
            .with_action(Action::assign("e1", vec!["u1"]))
            .with_action(Action::assign("e2", vec!["u2"]));
        let rule = h.engine.create_rule(rule).await.unwrap();

        let execution_id = h
            .engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = h.executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.steps.len(), 2);
        assert!(execution.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(h.assignments.assignments().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_timeout_marks_execution_timed_out() {
        let h = harness();
        let rule = Rule::new(tenant(), "instant timeout")
            .with_trigger(Trigger::event("e"))
            .with_settings(RuleSettings {
                timeout_seconds: 0,
                ..RuleSettings::default()
            })
            .with_action(Action::assign("e1", vec!["u1"]));
        let rule = h.engine.create_rule(rule).await.unwrap();

        let execution_id = h
            .engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let execution = h.executions.get(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert!(execution.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_after_daily_quota() {
        let h = harness();
        let rule = Rule::new(tenant(), "limited")
            .with_trigger(Trigger::event("e"))
            .with_settings(RuleSettings {
                max_executions_per_day: Some(2),
                ..RuleSettings::default()
            })
            .with_action(Action::assign("e1", vec!["u1"]));
        let rule = h.engine.create_rule(rule).await.unwrap();

        for _ in 0..2 {
            h.engine
                .execute_rule(rule.id, json!({}), ExecutionContext::default())
                .await
                .unwrap();
        }
        let err = h
            .engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RateLimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_rule_metadata_rolls_up() {
        let h = harness_with(|mut services| {
            services.email = Arc::new(FlakyEmailSender::broken());
            services
        });
        let rule = Rule::new(tenant(), "mixed")
            .with_trigger(Trigger::event("e"))
            .with_action(Action::assign("e1", vec!["u1"]));
        let rule = h.engine.create_rule(rule).await.unwrap();
        h.engine
            .execute_rule(rule.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let failing = Rule::new(rule.tenant_id, "failing")
            .with_trigger(Trigger::event("e"))
            .with_action(Action::send_email("a@x.com", "s", "b"));
        let failing = h.engine.create_rule(failing).await.unwrap();
        h.engine
            .execute_rule(failing.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let updated = h.engine.services().rules.get(rule.id).await.unwrap().unwrap();
        assert_eq!(updated.metadata.execution_count, 1);
        assert_eq!(updated.metadata.success_rate, 100.0);
        assert!(updated.metadata.last_executed_at.is_some());

        let updated_failing = h
            .engine
            .services()
            .rules
            .get(failing.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated_failing.metadata.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_webhook_secret_gates_dispatch() {
        let h = harness();
        let mut trigger = Trigger::webhook("hook-1");
        if let TriggerConfig::Webhook { secret, .. } = &mut trigger.config {
            *secret = Some("s3cret".to_string());
        }
        let rule = Rule::new(tenant(), "hooked")
            .with_trigger(trigger)
            .with_action(Action::assign("e1", vec!["u1"]));
        h.engine.create_rule(rule).await.unwrap();

        let denied = h
            .engine
            .handle_webhook_trigger("hook-1", json!({}), HashMap::new())
            .await;
        assert!(denied.is_empty());

        let mut headers = HashMap::new();
        headers.insert("x-relay-token".to_string(), "s3cret".to_string());
        let allowed = h
            .engine
            .handle_webhook_trigger("hook-1", json!({}), headers)
            .await;
        assert_eq!(allowed.len(), 1);
    }
}

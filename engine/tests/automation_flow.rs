// End-to-end flows through the engine facade: event dispatch, schedules,
// templates and metrics, all wired against in-memory collaborators.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use relay_engine::services::memory::{
    InMemoryExecutionStore, RecordingAssignmentStore, RecordingNotificationSender,
};
use relay_engine::{AutomationEngine, EngineConfig, EngineServices};
use relay_shared::{
    Action, Condition, ExecutionContext, ExecutionStatus, MetricsPeriod, Rule, StepStatus, Trigger,
};

struct World {
    engine: Arc<AutomationEngine>,
    executions: Arc<InMemoryExecutionStore>,
    assignments: Arc<RecordingAssignmentStore>,
    notifications: Arc<RecordingNotificationSender>,
}

fn world() -> World {
    common::init_test_logging();
    let executions = Arc::new(InMemoryExecutionStore::new());
    let assignments = Arc::new(RecordingAssignmentStore::new());
    let notifications = Arc::new(RecordingNotificationSender::new());
    let mut services = EngineServices::in_memory();
    services.executions = executions.clone();
    services.assignments = assignments.clone();
    services.notifications = notifications.clone();
    World {
        engine: AutomationEngine::new(EngineConfig::default(), services),
        executions,
        assignments,
        notifications,
    }
}

#[tokio::test]
async fn event_trigger_runs_assignment_rule_end_to_end() {
    let w = world();
    let tenant = Uuid::new_v4();

    let rule = Rule::new(tenant, "Assign uploads")
        .with_trigger(Trigger::event("file.uploaded"))
        .with_action(Action::assign("{{file_id}}", vec!["u1"]));
    w.engine.create_rule(rule).await.unwrap();

    let executed = w
        .engine
        .trigger_event("file.uploaded", json!({"file_id": "f1"}), ExecutionContext::default())
        .await;
    assert_eq!(executed.len(), 1);

    let execution = w.executions.get(executed[0]).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.triggered_by, "event:file.uploaded");
    assert_eq!(execution.steps.len(), 1);
    assert_eq!(execution.steps[0].status, StepStatus::Completed);
    assert_eq!(execution.steps[0].output.as_ref().unwrap()["assigned"], 1);
    assert_eq!(w.assignments.assignments(), vec![("f1".to_string(), vec!["u1".to_string()])]);
}

#[tokio::test]
async fn unrelated_events_do_not_fire() {
    let w = world();
    let rule = Rule::new(Uuid::new_v4(), "Assign uploads")
        .with_trigger(Trigger::event("file.uploaded"))
        .with_action(Action::assign("{{file_id}}", vec!["u1"]));
    w.engine.create_rule(rule).await.unwrap();

    let executed = w
        .engine
        .trigger_event("file.deleted", json!({}), ExecutionContext::default())
        .await;
    assert!(executed.is_empty());
    assert!(w.executions.all().await.is_empty());
}

#[tokio::test]
async fn dispatch_runs_rules_in_priority_order_and_isolates_failures() {
    let w = world();
    let tenant = Uuid::new_v4();

    // The urgent rule fails (custom actions are rejected), the backstop
    // succeeds.
    let urgent = Rule::new(tenant, "urgent")
        .with_priority(100)
        .with_trigger(Trigger::event("ticket.created"))
        .with_action(Action::new(
            "Explode",
            relay_shared::ActionConfig::Custom {
                handler: "none".to_string(),
                params: json!({}),
            },
        ));
    let backstop = Rule::new(tenant, "backstop")
        .with_priority(1)
        .with_trigger(Trigger::event("ticket.created"))
        .with_action(Action::assign("t1", vec!["u1"]));
    w.engine.create_rule(urgent).await.unwrap();
    w.engine.create_rule(backstop).await.unwrap();

    let executed = w
        .engine
        .trigger_event("ticket.created", json!({}), ExecutionContext::default())
        .await;

    // Both rules produced an execution; the urgent one failed without
    // blocking its sibling.
    assert_eq!(executed.len(), 2);
    let first = w.executions.get(executed[0]).await.unwrap();
    let second = w.executions.get(executed[1]).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Failed);
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(w.assignments.assignments().len(), 1);
}

#[tokio::test]
async fn interval_schedule_fires_on_each_tick() {
    let w = world();
    let rule = Rule::new(Uuid::new_v4(), "Every five minutes")
        .with_trigger(Trigger::interval("5m"))
        .with_action(Action::assign("e1", vec!["u1"]));
    w.engine.create_rule(rule).await.unwrap();

    let start = Utc::now();
    assert!(w.engine.tick_at(start + Duration::minutes(1)).await.is_empty());

    let first = w.engine.tick_at(start + Duration::minutes(5)).await;
    assert_eq!(first.len(), 1);
    let second = w.engine.tick_at(start + Duration::minutes(10)).await;
    assert_eq!(second.len(), 1);
    assert_ne!(first[0], second[0]);

    for id in first.iter().chain(second.iter()) {
        let execution = w.executions.get(*id).await.unwrap();
        assert!(execution.triggered_by.starts_with("schedule:"));
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }
}

#[tokio::test]
async fn webhook_dispatch_reaches_listening_rules() {
    let w = world();
    let rule = Rule::new(Uuid::new_v4(), "Hooked")
        .with_trigger(Trigger::webhook("gitlab-push"))
        .with_action(Action::assign("{{project.id}}", vec!["u1"]));
    w.engine.create_rule(rule).await.unwrap();

    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    let executed = w
        .engine
        .handle_webhook_trigger("gitlab-push", json!({"project": {"id": "p7"}}), headers)
        .await;

    assert_eq!(executed.len(), 1);
    let execution = w.executions.get(executed[0]).await.unwrap();
    assert_eq!(execution.triggered_by, "webhook:gitlab-push");
    assert_eq!(w.assignments.assignments()[0].0, "p7");
}

#[tokio::test]
async fn conditions_gate_dispatched_events() {
    let w = world();
    let rule = Rule::new(Uuid::new_v4(), "Critical only")
        .with_trigger(Trigger::event("ticket.created"))
        .with_condition(Condition::equals("priority", json!("critical")))
        .with_action(Action::notify(vec!["oncall"], "Critical ticket", "{{subject}}"));
    w.engine.create_rule(rule).await.unwrap();

    w.engine
        .trigger_event(
            "ticket.created",
            json!({"priority": "low", "subject": "meh"}),
            ExecutionContext::default(),
        )
        .await;
    assert!(w.notifications.sent().is_empty());

    w.engine
        .trigger_event(
            "ticket.created",
            json!({"priority": "critical", "subject": "db down"}),
            ExecutionContext::default(),
        )
        .await;
    let sent = w.notifications.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message, "db down");
}

#[tokio::test]
async fn template_rule_works_end_to_end() {
    let w = world();
    let tenant = Uuid::new_v4();

    let rule = w
        .engine
        .create_rule_from_template(
            "auto_assignment",
            &json!({"event_type": "file.uploaded", "assignees": ["u9"], "entity_field": "file_id"}),
            tenant,
            "admin",
        )
        .await
        .unwrap();
    assert_eq!(rule.tenant_id, tenant);

    let executed = w
        .engine
        .trigger_event("file.uploaded", json!({"file_id": "f9"}), ExecutionContext::default())
        .await;
    assert_eq!(executed.len(), 1);
    assert_eq!(w.assignments.assignments()[0], ("f9".to_string(), vec!["u9".to_string()]));
}

#[tokio::test]
async fn metrics_summarize_a_tenants_history() {
    let w = world();
    let tenant = Uuid::new_v4();

    let busy = Rule::new(tenant, "busy")
        .with_trigger(Trigger::event("e"))
        .with_action(Action::assign("x", vec!["u1"]));
    let busy = w.engine.create_rule(busy).await.unwrap();

    let guarded = Rule::new(tenant, "guarded")
        .with_trigger(Trigger::event("e"))
        .with_condition(Condition::equals("go", json!(true)))
        .with_action(Action::assign("x", vec!["u1"]));
    let guarded = w.engine.create_rule(guarded).await.unwrap();

    let failing = Rule::new(tenant, "failing")
        .with_trigger(Trigger::event("e"))
        .with_action(Action::new(
            "Custom",
            relay_shared::ActionConfig::Custom {
                handler: "x".to_string(),
                params: json!({}),
            },
        ));
    let failing = w.engine.create_rule(failing).await.unwrap();

    for _ in 0..3 {
        w.engine
            .execute_rule(busy.id, json!({}), ExecutionContext::default())
            .await
            .unwrap();
    }
    w.engine
        .execute_rule(guarded.id, json!({"go": false}), ExecutionContext::default())
        .await
        .unwrap();
    w.engine
        .execute_rule(failing.id, json!({}), ExecutionContext::default())
        .await
        .unwrap();

    let metrics = w
        .engine
        .get_metrics(tenant, MetricsPeriod::last_days(1))
        .await
        .unwrap();

    assert_eq!(metrics.total_executions, 5);
    assert_eq!(metrics.successful_executions, 3);
    assert_eq!(metrics.failed_executions, 1);
    assert_eq!(metrics.skipped_executions, 1);
    assert!(
        metrics.successful_executions + metrics.failed_executions + metrics.skipped_executions
            <= metrics.total_executions
    );
    assert_eq!(metrics.top_rules[0].name, "busy");
    assert_eq!(metrics.top_rules[0].executions, 3);
    assert!(!metrics.daily_trends.is_empty());
    assert!(!metrics.error_breakdown.is_empty());
}

#[tokio::test]
async fn deactivated_rule_refuses_to_run_but_history_survives() {
    let w = world();
    let tenant = Uuid::new_v4();
    let rule = Rule::new(tenant, "soon disabled")
        .with_trigger(Trigger::event("e"))
        .with_action(Action::assign("x", vec!["u1"]));
    let rule = w.engine.create_rule(rule).await.unwrap();

    w.engine
        .execute_rule(rule.id, json!({}), ExecutionContext::default())
        .await
        .unwrap();

    // Soft-deactivate and verify dispatch skips it while history remains.
    let mut updated = w.engine.services().rules.get(rule.id).await.unwrap().unwrap();
    updated.is_active = false;
    w.engine.services().rules.update(updated).await.unwrap();

    let executed = w
        .engine
        .trigger_event("e", json!({}), ExecutionContext::default())
        .await;
    assert!(executed.is_empty());
    assert_eq!(w.executions.all().await.len(), 1);
}

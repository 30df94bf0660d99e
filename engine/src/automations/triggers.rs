// Trigger registry: event and webhook indices plus interval timers.
//
// Registration and dispatch lookups are synchronized against tick
// processing; the registry never calls back into the orchestrator itself.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use relay_shared::{Condition, Rule, ScheduleKind, TriggerConfig};

use crate::error::{EngineError, EngineResult};

/// Parse an interval expression like `5m`, `2h` or `1d`.
pub fn parse_interval(expression: &str) -> EngineResult<Duration> {
    let re = Regex::new(r"^(\d+)([mhd])$").unwrap();
    let caps = re.captures(expression.trim()).ok_or_else(|| {
        EngineError::TriggerConfig(format!("invalid interval expression: '{expression}'"))
    })?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| EngineError::TriggerConfig(format!("interval out of range: '{expression}'")))?;
    if amount == 0 {
        return Err(EngineError::TriggerConfig(format!(
            "interval must be positive: '{expression}'"
        )));
    }
    Ok(match &caps[2] {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        _ => Duration::days(amount),
    })
}

/// A repeating timer armed for one trigger of one rule.
struct IntervalTimer {
    every: Duration,
    next_due: DateTime<Utc>,
    /// Condition-poll triggers carry a gate evaluated before dispatch.
    gate: Option<Condition>,
    provenance: &'static str,
}

/// Cron trigger cached for arming once a scheduler is running.
#[derive(Debug, Clone)]
pub struct CronSpec {
    pub rule_id: Uuid,
    pub trigger_id: Uuid,
    pub expression: String,
    pub timezone: Option<String>,
}

/// An interval timer that came due during a tick.
#[derive(Debug, Clone)]
pub struct DueTrigger {
    pub rule_id: Uuid,
    pub trigger_id: Uuid,
    pub triggered_by: String,
    pub gate: Option<Condition>,
}

#[derive(Default)]
pub struct TriggerRegistry {
    event_index: RwLock<HashMap<String, Vec<Uuid>>>,
    webhook_index: RwLock<HashMap<String, Vec<Uuid>>>,
    timers: RwLock<HashMap<(Uuid, Uuid), IntervalTimer>>,
    cron_specs: RwLock<HashMap<(Uuid, Uuid), CronSpec>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every enabled trigger of a rule. Re-registering a rule replaces
    /// its previous entries. Malformed schedule expressions are logged and
    /// left unarmed; they never fail registration of the other triggers.
    pub async fn register_rule(&self, rule: &Rule) {
        self.unregister_rule(rule.id).await;
        let now = Utc::now();

        for trigger in rule.triggers.iter().filter(|t| t.enabled) {
            match &trigger.config {
                TriggerConfig::Event { event_type } => {
                    let mut index = self.event_index.write().await;
                    let rules = index.entry(event_type.clone()).or_default();
                    if !rules.contains(&rule.id) {
                        rules.push(rule.id);
                    }
                }
                TriggerConfig::Webhook { webhook_id, .. } => {
                    let mut index = self.webhook_index.write().await;
                    let rules = index.entry(webhook_id.clone()).or_default();
                    if !rules.contains(&rule.id) {
                        rules.push(rule.id);
                    }
                }
                TriggerConfig::Schedule {
                    schedule: ScheduleKind::Interval,
                    expression,
                    ..
                } => match parse_interval(expression) {
                    Ok(every) => {
                        self.timers.write().await.insert(
                            (rule.id, trigger.id),
                            IntervalTimer {
                                every,
                                next_due: now + every,
                                gate: None,
                                provenance: "schedule",
                            },
                        );
                    }
                    Err(e) => {
                        warn!(rule_id = %rule.id, trigger_id = %trigger.id, error = %e,
                              "Schedule trigger not armed");
                    }
                },
                TriggerConfig::Schedule {
                    schedule: ScheduleKind::Cron,
                    expression,
                    timezone,
                } => {
                    self.cron_specs.write().await.insert(
                        (rule.id, trigger.id),
                        CronSpec {
                            rule_id: rule.id,
                            trigger_id: trigger.id,
                            expression: expression.clone(),
                            timezone: timezone.clone(),
                        },
                    );
                }
                TriggerConfig::Condition { condition, interval } => {
                    match parse_interval(interval) {
                        Ok(every) => {
                            self.timers.write().await.insert(
                                (rule.id, trigger.id),
                                IntervalTimer {
                                    every,
                                    next_due: now + every,
                                    gate: Some(condition.clone()),
                                    provenance: "poll",
                                },
                            );
                        }
                        Err(e) => {
                            warn!(rule_id = %rule.id, trigger_id = %trigger.id, error = %e,
                                  "Condition trigger not armed");
                        }
                    }
                }
                TriggerConfig::Manual => {}
            }
        }
    }

    /// Drop every index entry and timer belonging to a rule.
    pub async fn unregister_rule(&self, rule_id: Uuid) {
        self.event_index
            .write()
            .await
            .values_mut()
            .for_each(|rules| rules.retain(|id| *id != rule_id));
        self.webhook_index
            .write()
            .await
            .values_mut()
            .for_each(|rules| rules.retain(|id| *id != rule_id));
        self.timers
            .write()
            .await
            .retain(|(rule, _), _| *rule != rule_id);
        self.cron_specs
            .write()
            .await
            .retain(|(rule, _), _| *rule != rule_id);
    }

    pub async fn rules_for_event(&self, event_type: &str) -> Vec<Uuid> {
        self.event_index
            .read()
            .await
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn rules_for_webhook(&self, webhook_id: &str) -> Vec<Uuid> {
        self.webhook_index
            .read()
            .await
            .get(webhook_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Cron triggers waiting to be armed by a scheduler.
    pub async fn cron_specs(&self) -> Vec<CronSpec> {
        self.cron_specs.read().await.values().cloned().collect()
    }

    /// Collect interval timers due at `now` and advance their next firing.
    pub async fn due_triggers(&self, now: DateTime<Utc>) -> Vec<DueTrigger> {
        let mut timers = self.timers.write().await;
        let mut due = Vec::new();
        for ((rule_id, trigger_id), timer) in timers.iter_mut() {
            if timer.next_due <= now {
                timer.next_due = now + timer.every;
                due.push(DueTrigger {
                    rule_id: *rule_id,
                    trigger_id: *trigger_id,
                    triggered_by: format!("{}:{}", timer.provenance, trigger_id),
                    gate: timer.gate.clone(),
                });
            }
        }
        due
    }

    pub async fn armed_timer_count(&self) -> usize {
        self.timers.read().await.len()
    }
}

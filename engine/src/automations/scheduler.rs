// Background scheduling for schedule-type triggers.
//
// An injected capability owning the table of (rule, trigger) -> job handle;
// the engine holds no process-wide scheduler state. Cron triggers become
// real cron jobs (six-field expressions, optionally timezone-aware);
// interval triggers are driven by a single repeating job that ticks the
// registry.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

use super::engine::AutomationEngine;
use super::triggers::CronSpec;

pub struct TriggerScheduler {
    inner: JobScheduler,
    engine: Weak<AutomationEngine>,
    jobs: Mutex<HashMap<(Uuid, Uuid), Uuid>>,
}

impl TriggerScheduler {
    pub async fn new(engine: Weak<AutomationEngine>) -> EngineResult<Self> {
        let inner = JobScheduler::new()
            .await
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;
        Ok(Self {
            inner,
            engine,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Arm the repeating driver that fires due interval triggers, then
    /// start the scheduler.
    pub async fn start(&self, tick_interval_secs: u64) -> EngineResult<()> {
        let engine = self.engine.clone();
        let driver = Job::new_repeated_async(
            Duration::from_secs(tick_interval_secs.max(1)),
            move |_id, _lock| {
                let engine = engine.clone();
                Box::pin(async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.tick().await;
                    }
                })
            },
        )
        .map_err(|e| EngineError::Scheduler(e.to_string()))?;

        self.inner
            .add(driver)
            .await
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;
        self.inner
            .start()
            .await
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;

        info!(tick_interval_secs, "Trigger scheduler started");
        Ok(())
    }

    /// Arm one cron-type schedule trigger.
    pub async fn arm_cron(&self, spec: &CronSpec) -> EngineResult<()> {
        let engine = self.engine.clone();
        let rule_id = spec.rule_id;
        let triggered_by = format!("schedule:{}", spec.trigger_id);

        let run = move |_id, _lock| {
            let engine = engine.clone();
            let triggered_by = triggered_by.clone();
            Box::pin(async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                if let Err(e) = engine.run_scheduled(rule_id, triggered_by).await {
                    warn!(rule_id = %rule_id, error = %e, "Scheduled execution failed");
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        let job = match &spec.timezone {
            Some(name) => {
                let timezone: chrono_tz::Tz = name
                    .parse()
                    .map_err(|_| EngineError::TriggerConfig(format!("unknown timezone: {name}")))?;
                Job::new_async_tz(spec.expression.as_str(), timezone, run)
            }
            None => Job::new_async(spec.expression.as_str(), run),
        }
        .map_err(|e| {
            EngineError::TriggerConfig(format!(
                "invalid cron expression '{}': {e}",
                spec.expression
            ))
        })?;

        let guid = self
            .inner
            .add(job)
            .await
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;
        self.jobs
            .lock()
            .unwrap()
            .insert((spec.rule_id, spec.trigger_id), guid);

        info!(rule_id = %spec.rule_id, expression = %spec.expression, "Cron trigger armed");
        Ok(())
    }

    /// Cancel every cron job belonging to a rule.
    pub async fn disarm_rule(&self, rule_id: Uuid) {
        let guids: Vec<Uuid> = {
            let mut jobs = self.jobs.lock().unwrap();
            let keys: Vec<(Uuid, Uuid)> = jobs
                .keys()
                .filter(|(rule, _)| *rule == rule_id)
                .copied()
                .collect();
            keys.into_iter().filter_map(|key| jobs.remove(&key)).collect()
        };
        let mut inner = self.inner.clone();
        for guid in guids {
            if let Err(e) = inner.remove(&guid).await {
                warn!(rule_id = %rule_id, error = %e, "Failed to remove cron job");
            }
        }
    }

    pub fn armed_cron_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        let mut inner = self.inner.clone();
        inner
            .shutdown()
            .await
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;
        info!("Trigger scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(expression: &str, timezone: Option<&str>) -> CronSpec {
        CronSpec {
            rule_id: Uuid::new_v4(),
            trigger_id: Uuid::new_v4(),
            expression: expression.to_string(),
            timezone: timezone.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_arm_and_disarm_cron_jobs() {
        let scheduler = TriggerScheduler::new(Weak::new()).await.unwrap();
        let spec = spec("0 0 9 * * *", None);

        scheduler.arm_cron(&spec).await.unwrap();
        assert_eq!(scheduler.armed_cron_count(), 1);

        scheduler.disarm_rule(spec.rule_id).await;
        assert_eq!(scheduler.armed_cron_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_cron_expression_is_rejected() {
        let scheduler = TriggerScheduler::new(Weak::new()).await.unwrap();
        let err = scheduler.arm_cron(&spec("not a cron", None)).await.unwrap_err();
        assert!(matches!(err, EngineError::TriggerConfig(_)));
    }

    #[tokio::test]
    async fn test_unknown_timezone_is_rejected() {
        let scheduler = TriggerScheduler::new(Weak::new()).await.unwrap();
        let err = scheduler
            .arm_cron(&spec("0 0 9 * * *", Some("Mars/Olympus")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TriggerConfig(_)));
    }

    #[tokio::test]
    async fn test_timezone_aware_cron_is_accepted() {
        let scheduler = TriggerScheduler::new(Weak::new()).await.unwrap();
        scheduler
            .arm_cron(&spec("0 30 8 * * Mon-Fri", Some("Europe/Berlin")))
            .await
            .unwrap();
        assert_eq!(scheduler.armed_cron_count(), 1);
    }
}

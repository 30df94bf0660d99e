// Per-rule execution quota checks.
//
// Best-effort: the daily count is read from the execution store without a
// lock, so concurrent executions can slightly exceed the quota. Acceptable
// for this domain.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use relay_shared::Rule;

use crate::error::{EngineError, EngineResult};
use crate::services::ExecutionStore;

pub struct RateLimiter {
    executions: Arc<dyn ExecutionStore>,
}

impl RateLimiter {
    pub fn new(executions: Arc<dyn ExecutionStore>) -> Self {
        Self { executions }
    }

    /// Check the rule's cooldown and daily quota. Returns a distinguishable
    /// error instead of silently dropping the attempt.
    pub async fn check(&self, rule: &Rule) -> EngineResult<()> {
        if rule.settings.cooldown_seconds > 0 {
            if let Some(last) = rule.metadata.last_executed_at {
                let elapsed = (Utc::now() - last).num_seconds().max(0) as u64;
                if elapsed < rule.settings.cooldown_seconds {
                    return Err(EngineError::CooldownActive {
                        rule_id: rule.id,
                        remaining_seconds: rule.settings.cooldown_seconds - elapsed,
                    });
                }
            }
        }

        if let Some(quota) = rule.settings.max_executions_per_day {
            let today = Utc::now().date_naive();
            let count = self.executions.count_executions(rule.id, today).await?;
            if count >= u64::from(quota) {
                warn!(rule_id = %rule.id, count, quota, "Rate limit exceeded");
                return Err(EngineError::RateLimitExceeded(rule.id));
            }
        }

        Ok(())
    }
}

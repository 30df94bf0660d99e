// Engine error taxonomy.
//
// Errors raised before an execution record exists (rule lookup, rate
// limiting) propagate to the caller; failures inside individual actions are
// captured into the execution's step records instead and never surface here.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("Rule is inactive: {0}")]
    RuleInactive(Uuid),

    #[error("Rate limit exceeded for rule {0}")]
    RateLimitExceeded(Uuid),

    #[error("Rule {rule_id} is cooling down for another {remaining_seconds}s")]
    CooldownActive { rule_id: Uuid, remaining_seconds: u64 },

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Action '{name}' failed: {message}")]
    ActionExecution { name: String, message: String },

    #[error("Invalid trigger configuration: {0}")]
    TriggerConfig(String),

    #[error("Invalid rule definition: {0}")]
    Validation(String),

    #[error("Unknown rule template: {0}")]
    TemplateNotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn action(name: &str, err: impl std::fmt::Display) -> Self {
        Self::ActionExecution {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

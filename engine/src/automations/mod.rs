// Rule Automation Engine
//
// Event-driven automation for the Relay platform: trigger dispatch,
// condition evaluation, ordered action execution with per-step auditing,
// rate limiting, scheduling and execution metrics.

pub mod conditions;
pub mod engine;
pub mod executor;
pub mod metrics;
pub mod rate_limit;
pub mod scheduler;
pub mod templates;
pub mod triggers;

pub use engine::AutomationEngine;
pub use executor::ActionExecutor;
pub use metrics::{AutomationMetrics, ErrorCategory};
pub use rate_limit::RateLimiter;
pub use scheduler::TriggerScheduler;
pub use triggers::TriggerRegistry;

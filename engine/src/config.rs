use std::env;
use serde::{Deserialize, Serialize};

/// Engine-level tunables. Per-rule behavior lives in `RuleSettings`; these
/// are the defaults the process runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the scheduler driver checks interval triggers (seconds).
    pub tick_interval_secs: u64,
    /// Delay between retry attempts of a failed action (seconds).
    pub retry_delay_secs: u64,
    /// Timeout applied to outbound webhook calls (seconds).
    pub http_timeout_secs: u64,
    /// How many rules `top_rules` reporting returns.
    pub top_rules_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            retry_delay_secs: 5,
            http_timeout_secs: 30,
            top_rules_limit: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_interval_secs: env_u64("RELAY_TICK_INTERVAL_SECS", defaults.tick_interval_secs),
            retry_delay_secs: env_u64("RELAY_RETRY_DELAY_SECS", defaults.retry_delay_secs),
            http_timeout_secs: env_u64("RELAY_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            top_rules_limit: env_u64("RELAY_TOP_RULES_LIMIT", defaults.top_rules_limit as u64)
                as usize,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval_secs, 30);
        assert_eq!(config.top_rules_limit, 10);
    }
}

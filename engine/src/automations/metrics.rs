// Execution metrics aggregation.
//
// Pure aggregation over stored executions: totals, top rules, daily trend
// buckets and a keyword taxonomy of failure reasons.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use relay_shared::{Execution, ExecutionStatus, Rule};

#[derive(Debug, Clone, Serialize)]
pub struct AutomationMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub skipped_executions: u64,
    pub average_duration_ms: f64,
    pub top_rules: Vec<RuleUsage>,
    pub daily_trends: Vec<DailyTrend>,
    pub error_breakdown: Vec<ErrorBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleUsage {
    pub rule_id: Uuid,
    pub name: String,
    pub executions: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBucket {
    pub category: ErrorCategory,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Network,
    Permission,
    Validation,
    Database,
    Other,
}

impl ErrorCategory {
    const ALL: [ErrorCategory; 6] = [
        Self::Timeout,
        Self::Network,
        Self::Permission,
        Self::Validation,
        Self::Database,
        Self::Other,
    ];
}

/// Keyword-categorize a failure reason.
pub fn categorize_error(error: &str) -> ErrorCategory {
    let error = error.to_lowercase();
    if error.contains("timeout") || error.contains("timed out") {
        ErrorCategory::Timeout
    } else if error.contains("network")
        || error.contains("connection")
        || error.contains("unreachable")
        || error.contains("dns")
    {
        ErrorCategory::Network
    } else if error.contains("permission")
        || error.contains("forbidden")
        || error.contains("unauthorized")
        || error.contains("denied")
    {
        ErrorCategory::Permission
    } else if error.contains("validation")
        || error.contains("invalid")
        || error.contains("missing")
    {
        ErrorCategory::Validation
    } else if error.contains("database") || error.contains("sql") || error.contains("query") {
        ErrorCategory::Database
    } else {
        ErrorCategory::Other
    }
}

fn is_skipped(execution: &Execution) -> bool {
    execution
        .result
        .as_ref()
        .and_then(|r| r.get("skipped"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Aggregate a tenant's executions for a reporting period.
pub fn aggregate(rules: &[Rule], executions: &[Execution], top_limit: usize) -> AutomationMetrics {
    let total_executions = executions.len() as u64;
    let skipped_executions = executions.iter().filter(|e| is_skipped(e)).count() as u64;
    let successful_executions = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Completed && !is_skipped(e))
        .count() as u64;
    let failed_executions = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .count() as u64;

    let durations: Vec<i64> = executions.iter().filter_map(|e| e.duration_ms).collect();
    let average_duration_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<i64>() as f64 / durations.len() as f64
    };

    // Top rules by execution count, with per-rule success rate.
    let rule_names: HashMap<Uuid, &str> = rules.iter().map(|r| (r.id, r.name.as_str())).collect();
    let mut per_rule: HashMap<Uuid, (u64, u64)> = HashMap::new();
    for execution in executions {
        let entry = per_rule.entry(execution.rule_id).or_default();
        entry.0 += 1;
        if execution.status == ExecutionStatus::Completed && !is_skipped(execution) {
            entry.1 += 1;
        }
    }
    let mut top_rules: Vec<RuleUsage> = per_rule
        .into_iter()
        .map(|(rule_id, (count, successes))| RuleUsage {
            rule_id,
            name: rule_names
                .get(&rule_id)
                .map(|name| (*name).to_string())
                .unwrap_or_else(|| rule_id.to_string()),
            executions: count,
            success_rate: if count == 0 {
                0.0
            } else {
                successes as f64 / count as f64 * 100.0
            },
        })
        .collect();
    top_rules.sort_by(|a, b| b.executions.cmp(&a.executions).then(a.name.cmp(&b.name)));
    top_rules.truncate(top_limit);

    // Daily trend buckets by calendar day of the triggering timestamp.
    let mut days: BTreeMap<NaiveDate, (u64, u64, u64)> = BTreeMap::new();
    for execution in executions {
        let bucket = days.entry(execution.triggered_at.date_naive()).or_default();
        bucket.0 += 1;
        match execution.status {
            ExecutionStatus::Completed if !is_skipped(execution) => bucket.1 += 1,
            ExecutionStatus::Failed => bucket.2 += 1,
            _ => {}
        }
    }
    let daily_trends = days
        .into_iter()
        .map(|(date, (executions, successes, failures))| DailyTrend {
            date,
            executions,
            successes,
            failures,
        })
        .collect();

    // Error taxonomy over every execution carrying a failure reason.
    let mut categories: HashMap<ErrorCategory, u64> = HashMap::new();
    let mut errored = 0u64;
    for execution in executions {
        if let Some(error) = &execution.error {
            errored += 1;
            *categories.entry(categorize_error(error)).or_default() += 1;
        }
    }
    let error_breakdown = ErrorCategory::ALL
        .iter()
        .filter_map(|category| {
            let count = *categories.get(category)?;
            Some(ErrorBucket {
                category: *category,
                count,
                percentage: if errored == 0 {
                    0.0
                } else {
                    count as f64 / errored as f64 * 100.0
                },
            })
        })
        .collect();

    AutomationMetrics {
        total_executions,
        successful_executions,
        failed_executions,
        skipped_executions,
        average_duration_ms,
        top_rules,
        daily_trends,
        error_breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::ExecutionContext;
    use serde_json::json;

    fn execution(rule: &Rule, status: ExecutionStatus, error: Option<&str>) -> Execution {
        let mut execution = Execution::new(
            rule,
            "manual",
            json!({}),
            ExecutionContext::default(),
        );
        execution.started_at = Some(execution.triggered_at);
        execution.status = status;
        execution.error = error.map(String::from);
        execution.duration_ms = Some(100);
        execution
    }

    fn skipped(rule: &Rule) -> Execution {
        let mut execution = execution(rule, ExecutionStatus::Completed, None);
        execution.result = Some(json!({"skipped": true, "reason": "Conditions not met"}));
        execution
    }

    #[test]
    fn test_categorize_error_keywords() {
        assert_eq!(categorize_error("Execution timed out after 30s"), ErrorCategory::Timeout);
        assert_eq!(categorize_error("connection refused"), ErrorCategory::Network);
        assert_eq!(categorize_error("403 Forbidden"), ErrorCategory::Permission);
        assert_eq!(categorize_error("missing values"), ErrorCategory::Validation);
        assert_eq!(categorize_error("SQL constraint violated"), ErrorCategory::Database);
        assert_eq!(categorize_error("something odd"), ErrorCategory::Other);
    }

    #[test]
    fn test_totals_partition_correctly() {
        let tenant = Uuid::new_v4();
        let rule = Rule::new(tenant, "r1");
        let executions = vec![
            execution(&rule, ExecutionStatus::Completed, None),
            execution(&rule, ExecutionStatus::Completed, None),
            execution(&rule, ExecutionStatus::Failed, Some("connection reset")),
            execution(&rule, ExecutionStatus::Timeout, Some("timed out")),
            skipped(&rule),
        ];

        let metrics = aggregate(&[rule], &executions, 10);
        assert_eq!(metrics.total_executions, 5);
        assert_eq!(metrics.successful_executions, 2);
        assert_eq!(metrics.failed_executions, 1);
        assert_eq!(metrics.skipped_executions, 1);
        assert!(
            metrics.successful_executions + metrics.failed_executions + metrics.skipped_executions
                <= metrics.total_executions
        );
        assert_eq!(metrics.average_duration_ms, 100.0);
    }

    #[test]
    fn test_top_rules_sorted_by_execution_count() {
        let tenant = Uuid::new_v4();
        let busy = Rule::new(tenant, "busy");
        let quiet = Rule::new(tenant, "quiet");
        let mut executions = Vec::new();
        for _ in 0..5 {
            executions.push(execution(&busy, ExecutionStatus::Completed, None));
        }
        executions.push(execution(&quiet, ExecutionStatus::Failed, Some("boom")));

        let metrics = aggregate(&[busy.clone(), quiet.clone()], &executions, 10);
        assert_eq!(metrics.top_rules.len(), 2);
        assert_eq!(metrics.top_rules[0].name, "busy");
        assert_eq!(metrics.top_rules[0].executions, 5);
        assert_eq!(metrics.top_rules[0].success_rate, 100.0);
        assert_eq!(metrics.top_rules[1].success_rate, 0.0);
        assert!(metrics.top_rules[0].executions >= metrics.top_rules[1].executions);
    }

    #[test]
    fn test_top_rules_respects_limit() {
        let tenant = Uuid::new_v4();
        let rules: Vec<Rule> = (0..15)
            .map(|i| Rule::new(tenant, &format!("rule-{i}")))
            .collect();
        let executions: Vec<Execution> = rules
            .iter()
            .map(|r| execution(r, ExecutionStatus::Completed, None))
            .collect();

        let metrics = aggregate(&rules, &executions, 10);
        assert_eq!(metrics.top_rules.len(), 10);
    }

    #[test]
    fn test_daily_trends_bucket_by_day() {
        let tenant = Uuid::new_v4();
        let rule = Rule::new(tenant, "r");
        let mut yesterday = execution(&rule, ExecutionStatus::Completed, None);
        yesterday.triggered_at = yesterday.triggered_at - chrono::Duration::days(1);
        let today_ok = execution(&rule, ExecutionStatus::Completed, None);
        let today_failed = execution(&rule, ExecutionStatus::Failed, Some("boom"));

        let metrics = aggregate(&[rule], &[yesterday, today_ok, today_failed], 10);
        assert_eq!(metrics.daily_trends.len(), 2);
        // Buckets are in chronological order.
        assert!(metrics.daily_trends[0].date < metrics.daily_trends[1].date);
        assert_eq!(metrics.daily_trends[1].executions, 2);
        assert_eq!(metrics.daily_trends[1].successes, 1);
        assert_eq!(metrics.daily_trends[1].failures, 1);
    }

    #[test]
    fn test_error_breakdown_percentages() {
        let tenant = Uuid::new_v4();
        let rule = Rule::new(tenant, "r");
        let executions = vec![
            execution(&rule, ExecutionStatus::Failed, Some("connection refused")),
            execution(&rule, ExecutionStatus::Failed, Some("network unreachable")),
            execution(&rule, ExecutionStatus::Failed, Some("weird")),
            execution(&rule, ExecutionStatus::Timeout, Some("Execution timed out after 30s")),
        ];

        let metrics = aggregate(&[rule], &executions, 10);
        let network = metrics
            .error_breakdown
            .iter()
            .find(|b| b.category == ErrorCategory::Network)
            .unwrap();
        assert_eq!(network.count, 2);
        assert_eq!(network.percentage, 50.0);
        let total: u64 = metrics.error_breakdown.iter().map(|b| b.count).sum();
        assert_eq!(total, 4);
    }
}

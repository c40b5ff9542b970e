//! Execution-budget polling and classification against a monthly limit (§4.11).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::{BudgetSample, WorkflowCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Critical,
}

pub fn classify(total_executions: u64, monthly_limit: u64) -> BudgetStatus {
    let pct = total_executions as f64 / monthly_limit.max(1) as f64 * 100.0;
    if pct >= 90.0 {
        BudgetStatus::Critical
    } else if pct >= 70.0 {
        BudgetStatus::Warning
    } else {
        BudgetStatus::Ok
    }
}

/// Raw execution counts as fetched from the automation provider.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCounts {
    pub by_workflow: BTreeMap<String, WorkflowCounts>,
    pub active_workflows: u64,
    pub total_workflows: u64,
}

impl ExecutionCounts {
    pub fn totals(&self) -> (u64, u64, u64) {
        let total: u64 = self.by_workflow.values().map(|c| c.total).sum();
        let success: u64 = self.by_workflow.values().map(|c| c.success).sum();
        let failed: u64 = self.by_workflow.values().map(|c| c.failed).sum();
        (total, success, failed)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BudgetLog {
    history: Vec<BudgetSample>,
}

pub struct BudgetGuard {
    log_path: PathBuf,
    monthly_limit: u64,
}

impl BudgetGuard {
    pub fn new(log_path: impl Into<PathBuf>, monthly_limit: u64) -> Self {
        Self {
            log_path: log_path.into(),
            monthly_limit,
        }
    }

    fn load_log(&self) -> BudgetLog {
        std::fs::read(&self.log_path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default()
    }

    fn save_log(&self, log: &BudgetLog) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(log).unwrap_or_default();
        std::fs::write(&self.log_path, bytes)
    }

    /// Record a budget sample derived from freshly fetched execution counts,
    /// append it to the bounded 30-entry history, and classify it.
    pub fn check_budget(&self, counts: &ExecutionCounts, monthly_limit: Option<u64>) -> (BudgetSample, BudgetStatus) {
        let limit = monthly_limit.unwrap_or(self.monthly_limit);
        let (total, success, failed) = counts.totals();
        let failure_rate = (failed as f64 / total.max(1) as f64 * 100.0 * 10.0).round() / 10.0;

        let sample = BudgetSample {
            timestamp: Utc::now(),
            total_executions: total,
            success,
            failed,
            failure_rate,
            by_workflow: counts.by_workflow.clone(),
            monthly_limit: limit,
        };

        let mut log = self.load_log();
        log.history.push(sample.clone());
        let start = log.history.len().saturating_sub(30);
        log.history = log.history.split_off(start);
        let _ = self.save_log(&log);

        let status = classify(total, limit);
        (sample, status)
    }

    pub fn history(&self) -> Vec<BudgetSample> {
        self.load_log().history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, BudgetStatus::Ok; "zero usage is ok")]
    #[test_case(69, BudgetStatus::Ok; "just below warning")]
    #[test_case(70, BudgetStatus::Warning; "warning threshold")]
    #[test_case(89, BudgetStatus::Warning; "just below critical")]
    #[test_case(90, BudgetStatus::Critical; "critical threshold")]
    #[test_case(150, BudgetStatus::Critical; "over limit")]
    fn classify_boundaries(pct_of_100_limit: u64, expected: BudgetStatus) {
        assert_eq!(classify(pct_of_100_limit, 100), expected);
    }

    #[test]
    fn history_bounded_to_30_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n8n_execution_log.json");
        let guard = BudgetGuard::new(&path, 10_000);

        for i in 0..35 {
            let mut counts = ExecutionCounts::default();
            counts.by_workflow.insert(
                "wf-a".into(),
                WorkflowCounts {
                    total: i,
                    success: i,
                    failed: 0,
                },
            );
            guard.check_budget(&counts, None);
        }

        assert_eq!(guard.history().len(), 30);
    }

    #[test]
    fn failure_rate_rounded_to_one_decimal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n8n_execution_log.json");
        let guard = BudgetGuard::new(&path, 10_000);
        let mut counts = ExecutionCounts::default();
        counts.by_workflow.insert(
            "wf-a".into(),
            WorkflowCounts {
                total: 3,
                success: 2,
                failed: 1,
            },
        );
        let (sample, _) = guard.check_budget(&counts, None);
        assert_eq!(sample.failure_rate, 33.3);
    }
}

//! Result Aggregation
//!
//! Folds per-gate results into an overall verdict and a performance report.
//! The verdict uses a strict precedence (failed, then warning, then passed)
//! and only looks at the final result set, so it cannot depend on whether
//! the gates ran sequentially or in parallel.

use gatework_core::{GateStatus, IssueSeverity};
use serde::{Deserialize, Serialize};

use crate::models::{ExecutionResult, GateResult};

/// Overall status of a result set.
///
/// Any `failed` gate makes the set `failed`; otherwise any `warning` makes it
/// `warning`; otherwise it is `passed`. Skipped gates and empty sets pass.
pub fn derive_overall_status<'a, I>(results: I) -> GateStatus
where
    I: IntoIterator<Item = &'a GateResult>,
{
    let mut overall = GateStatus::Passed;
    for result in results {
        match result.status {
            GateStatus::Failed => return GateStatus::Failed,
            GateStatus::Warning => overall = GateStatus::Warning,
            GateStatus::Passed | GateStatus::Skipped => {}
        }
    }
    overall
}

// ============================================================================
// Reports
// ============================================================================

/// Timing and cache figures for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub wall_time_ms: u64,
    /// Sum of per-gate processing times
    pub cumulative_processing_ms: u64,
    /// Cumulative processing time over wall time (1.0 when sequential)
    pub parallel_speedup: f64,
    pub cache_hits: usize,
    /// Percentage of resolved gates served from cache
    pub cache_hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slowest_gate: Option<String>,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Summary of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub overall_status: GateStatus,
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Mean score of gates that were not skipped
    pub average_score: f64,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub performance: PerformanceReport,
}

impl AggregateReport {
    /// Whether the run may be treated as successful.
    pub fn is_success(&self) -> bool {
        self.overall_status.is_success()
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Builds `AggregateReport`s from execution results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Summarize an execution.
    pub fn aggregate(&self, execution: &ExecutionResult) -> AggregateReport {
        let results = &execution.gate_results;
        let count = |status: GateStatus| results.iter().filter(|r| r.status == status).count();

        let scored: Vec<f64> = results
            .iter()
            .filter(|r| r.status != GateStatus::Skipped)
            .map(|r| r.score)
            .collect();
        let average_score = if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f64>() / scored.len() as f64
        };

        let total_issues = results.iter().map(|r| r.issues.len()).sum();
        let critical_issues = results
            .iter()
            .flat_map(|r| r.issues.iter())
            .filter(|i| i.severity == IssueSeverity::Critical)
            .count();

        AggregateReport {
            overall_status: derive_overall_status(results),
            total: results.len(),
            passed: count(GateStatus::Passed),
            warnings: count(GateStatus::Warning),
            failed: count(GateStatus::Failed),
            skipped: count(GateStatus::Skipped),
            average_score,
            total_issues,
            critical_issues,
            performance: self.performance(execution),
        }
    }

    fn performance(&self, execution: &ExecutionResult) -> PerformanceReport {
        let results = &execution.gate_results;
        let cumulative_processing_ms: u64 = results.iter().map(|r| r.processing_time).sum();

        let resolved = results
            .iter()
            .filter(|r| r.status != GateStatus::Skipped)
            .count();
        let cache_hit_rate = if resolved > 0 {
            execution.cache_hits as f64 / resolved as f64 * 100.0
        } else {
            0.0
        };

        let parallel_speedup = if execution.execution_time > 0 {
            cumulative_processing_ms as f64 / execution.execution_time as f64
        } else {
            1.0
        };

        let slowest_gate = results
            .iter()
            .filter(|r| !r.cache_hit && r.status != GateStatus::Skipped)
            .max_by_key(|r| r.processing_time)
            .map(|r| r.gate.clone());

        let mut timings: Vec<u64> = results
            .iter()
            .filter(|r| !r.cache_hit && r.status != GateStatus::Skipped)
            .map(|r| r.processing_time)
            .collect();
        timings.sort_unstable();

        PerformanceReport {
            wall_time_ms: execution.execution_time,
            cumulative_processing_ms,
            parallel_speedup,
            cache_hits: execution.cache_hits,
            cache_hit_rate,
            slowest_gate,
            p50_ms: percentile(&timings, 50.0),
            p95_ms: percentile(&timings, 95.0),
            p99_ms: percentile(&timings, 99.0),
        }
    }
}

/// Nearest-rank percentile of sorted samples.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

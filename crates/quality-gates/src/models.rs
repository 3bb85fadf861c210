//! Quality Gates Models
//!
//! Data structures for gate definitions, per-gate results and whole-run
//! execution results.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use gatework_core::{CoreError, GateStatus, GateType, Issue, IssueSeverity, TargetKind, ValidatorOutput};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Enums
// ============================================================================

/// Declared importance of a gate. Orders ties in the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatePriority {
    Critical,
    High,
    Medium,
    Low,
}

impl GatePriority {
    /// Sort rank, lower runs first (critical = 0).
    pub fn rank(&self) -> u8 {
        match self {
            GatePriority::Critical => 0,
            GatePriority::High => 1,
            GatePriority::Medium => 2,
            GatePriority::Low => 3,
        }
    }
}

impl Default for GatePriority {
    fn default() -> Self {
        GatePriority::Medium
    }
}

impl std::fmt::Display for GatePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatePriority::Critical => write!(f, "critical"),
            GatePriority::High => write!(f, "high"),
            GatePriority::Medium => write!(f, "medium"),
            GatePriority::Low => write!(f, "low"),
        }
    }
}

/// How the engine walks a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One gate at a time, in execution order
    Sequential,
    /// Layer by layer, gates within a layer run concurrently
    Parallel,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Parallel
    }
}

/// What happens to the rest of a run when a gate's dependency has no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Skip the gate, keep running everything else
    SkipAndContinue,
    /// Skip the gate and every gate that has not resolved yet
    AbortChain,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        DependencyPolicy::SkipAndContinue
    }
}

/// Per-gate lifecycle inside one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateExecutionState {
    /// Waiting for its layer / turn
    Pending,
    /// Dependencies satisfied
    Ready,
    /// Validator call in flight
    Running,
    /// Validator returned a result (any status)
    Completed,
    /// Validator failed twice or permanently; fallback result synthesized
    Failed,
    /// Last attempt exceeded the deadline; fallback result synthesized
    TimedOut,
    /// Not executed
    Skipped,
}

impl GateExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GateExecutionState::Completed
                | GateExecutionState::Failed
                | GateExecutionState::TimedOut
                | GateExecutionState::Skipped
        )
    }
}

// ============================================================================
// Gate
// ============================================================================

/// A single gate definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    /// Unique name within a registry
    pub name: String,
    /// Type tag used to resolve the validator
    #[serde(rename = "type")]
    pub gate_type: GateType,
    #[serde(default)]
    pub priority: GatePriority,
    /// Deadline in milliseconds; `None` uses the pipeline default
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Names of gates that must resolve first
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Opaque configuration forwarded to the validator
    #[serde(default)]
    pub configuration: Map<String, Value>,
    /// Target kinds this gate applies to; empty means all
    #[serde(default)]
    pub target_kinds: Vec<TargetKind>,
}

fn default_enabled() -> bool {
    true
}

impl Gate {
    /// Create an enabled, medium-priority gate without dependencies.
    pub fn new(name: impl Into<String>, gate_type: GateType) -> Self {
        Self {
            name: name.into(),
            gate_type,
            priority: GatePriority::default(),
            timeout_ms: None,
            dependencies: BTreeSet::new(),
            enabled: true,
            configuration: Map::new(),
            target_kinds: Vec::new(),
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: GatePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, gate: impl Into<String>) -> Self {
        self.dependencies.insert(gate.into());
        self
    }

    /// Set enabled flag
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Set applicable target kinds
    pub fn for_targets(mut self, kinds: Vec<TargetKind>) -> Self {
        self.target_kinds = kinds;
        self
    }

    /// Deadline for this gate, falling back to `default`.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Whether the gate applies to the given target kind.
    pub fn applies_to(&self, kind: TargetKind) -> bool {
        self.target_kinds.is_empty() || self.target_kinds.contains(&kind)
    }
}

// ============================================================================
// GateResult
// ============================================================================

/// Result of one gate in one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    /// Gate name
    pub gate: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    pub status: GateStatus,
    /// Score in `[0, 100]`
    pub score: f64,
    pub issues: Vec<Issue>,
    /// Time the engine spent on this gate, retries included
    pub processing_time: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Served from the result cache
    #[serde(default)]
    pub cache_hit: bool,
    /// Validator invocations (0 for skipped and cached results)
    #[serde(default)]
    pub attempts: u32,
}

impl GateResult {
    /// Build a result from validator output.
    pub fn from_output(gate: &Gate, output: ValidatorOutput, elapsed_ms: u64, attempts: u32) -> Self {
        let mut metadata = output.metadata;
        metadata.insert("valid".to_string(), Value::Bool(output.valid));
        if output.processing_time_ms > 0 {
            metadata.insert(
                "reportedProcessingTime".to_string(),
                Value::from(output.processing_time_ms),
            );
        }
        Self {
            gate: gate.name.clone(),
            gate_type: gate.gate_type,
            status: output.status,
            score: clamp_score(output.score),
            issues: output.issues,
            processing_time: elapsed_ms,
            metadata,
            cache_hit: false,
            attempts,
        }
    }

    /// Create a result for a gate that did not run
    pub fn skipped(gate: &Gate, reason: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("reason".to_string(), Value::String(reason.into()));
        Self {
            gate: gate.name.clone(),
            gate_type: gate.gate_type,
            status: GateStatus::Skipped,
            score: 0.0,
            issues: Vec::new(),
            processing_time: 0,
            metadata,
            cache_hit: false,
            attempts: 0,
        }
    }

    /// Synthesized result for a gate whose execution failed for good.
    ///
    /// Status is `failed`, score 0, with a single critical issue describing
    /// the error.
    pub fn fallback_failure(gate: &Gate, error: &CoreError, elapsed_ms: u64, attempts: u32) -> Self {
        let mut metadata = Map::new();
        metadata.insert("fallback".to_string(), Value::Bool(true));
        metadata.insert("error".to_string(), Value::String(error.to_string()));
        Self {
            gate: gate.name.clone(),
            gate_type: gate.gate_type,
            status: GateStatus::Failed,
            score: 0.0,
            issues: vec![Issue::new(
                IssueSeverity::Critical,
                format!("Gate '{}' could not complete: {}", gate.name, error),
            )],
            processing_time: elapsed_ms,
            metadata,
            cache_hit: false,
            attempts,
        }
    }

    /// Reason recorded on a skipped result.
    pub fn skip_reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(Value::as_str)
    }

    /// Whether this result was synthesized after the validator failed.
    pub fn is_fallback(&self) -> bool {
        self.metadata.get("fallback").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Copy of a cached result marked as a cache hit.
    pub fn as_cache_hit(&self) -> Self {
        let mut hit = self.clone();
        hit.cache_hit = true;
        hit.attempts = 0;
        hit
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

// ============================================================================
// ExecutionResult
// ============================================================================

/// Result of executing a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// One entry per planned gate, in plan order
    pub gate_results: Vec<GateResult>,
    pub overall_status: GateStatus,
    /// Wall-clock time of the whole execution
    pub execution_time: u64,
    /// Sum of per-layer wall-clock times (parallel mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_execution_time: Option<u64>,
    /// Final lifecycle state of every gate
    pub states: BTreeMap<String, GateExecutionState>,
    /// Number of results served from cache
    pub cache_hits: usize,
    /// Why the run was halted early, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

impl ExecutionResult {
    /// Look up a gate's result by name.
    pub fn result_for(&self, gate: &str) -> Option<&GateResult> {
        self.gate_results.iter().find(|r| r.gate == gate)
    }
}

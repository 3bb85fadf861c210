//! Validation Planner
//!
//! Turns a `ValidationContext` into a `ValidationPlan`:
//!
//! 1. Select enabled gates matching the requested gate types and target kind,
//!    optionally pulling in their enabled transitive dependencies
//! 2. Ask the registry for the execution order and parallel layers of the
//!    selection
//! 3. Within each layer, dispatch gates that are likely cache hits first
//! 4. Estimate the run time as the sum over layers of the slowest timeout
//! 5. Settle the concurrency limit (request constraint, reported load)
//!
//! Every planned gate carries a snapshot of its definition, its validator
//! and its cache key, so registry changes made after planning never reach a
//! plan in flight.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatework_core::{CoreResult, GateContext, GateValidator, ValidationContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cache::{cache_key, ResultCache};
use crate::models::{DependencyPolicy, ExecutionMode, Gate};
use crate::registry::GateRegistry;

// ============================================================================
// Config
// ============================================================================

/// Planner settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Upper bound on concurrently running gates
    pub max_concurrency: usize,
    /// Reported load at or above which concurrency is halved
    pub high_load_threshold: f64,
    /// Pull enabled transitive dependencies of selected gates into the plan
    pub include_dependencies: bool,
    /// Dispatch likely cache hits first within a layer
    pub reorder_by_cache_probability: bool,
    pub execution_mode: ExecutionMode,
    pub dependency_policy: DependencyPolicy,
    pub stop_on_critical_failure: bool,
    /// Timeout for gates that do not declare one
    pub default_timeout: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            high_load_threshold: 0.8,
            include_dependencies: true,
            reorder_by_cache_probability: true,
            execution_mode: ExecutionMode::default(),
            dependency_policy: DependencyPolicy::default(),
            stop_on_critical_failure: false,
            default_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Plan Types
// ============================================================================

/// A gate as frozen into a plan.
#[derive(Clone)]
pub struct PlannedGate {
    pub gate: Gate,
    /// Resolved validator; `None` when no enabled validator serves the type
    pub validator: Option<Arc<dyn GateValidator>>,
    pub cache_key: String,
    pub timeout: Duration,
}

impl PlannedGate {
    /// Per-gate context handed to the validator.
    pub fn context(&self, request: Arc<ValidationContext>) -> GateContext {
        GateContext::new(
            request,
            self.gate.name.clone(),
            self.gate.gate_type,
            Value::Object(self.gate.configuration.clone()),
        )
    }
}

impl std::fmt::Debug for PlannedGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedGate")
            .field("gate", &self.gate.name)
            .field("validator", &self.validator.as_ref().map(|v| v.name().to_string()))
            .field("cache_key", &self.cache_key)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Ordered and layered selection of gates for one request.
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub id: String,
    /// Planned gates in execution order
    pub gates: Vec<PlannedGate>,
    /// Topologically valid sequence of gate names
    pub execution_order: Vec<String>,
    /// Layers; every dependency of a gate in layer k sits in a layer < k
    pub parallel_groups: Vec<Vec<String>>,
    /// Declared dependencies of each planned gate
    pub dependency_map: BTreeMap<String, Vec<String>>,
    /// Sum over layers of the largest timeout in the layer
    pub estimated_total_time: Duration,
    pub max_concurrency: usize,
    pub execution_mode: ExecutionMode,
    pub dependency_policy: DependencyPolicy,
    pub stop_on_critical_failure: bool,
    pub created_at: DateTime<Utc>,
}

impl ValidationPlan {
    /// Number of planned gates.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Index of a gate in plan order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.gates.iter().position(|g| g.gate.name == name)
    }

    /// Look up a planned gate.
    pub fn gate(&self, name: &str) -> Option<&PlannedGate> {
        self.gates.iter().find(|g| g.gate.name == name)
    }

    /// Serializable description of the plan.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id.clone(),
            execution_order: self.execution_order.clone(),
            parallel_groups: self.parallel_groups.clone(),
            dependency_map: self.dependency_map.clone(),
            estimated_total_time_ms: self.estimated_total_time.as_millis() as u64,
            max_concurrency: self.max_concurrency,
            execution_mode: self.execution_mode,
        }
    }
}

/// Serializable plan description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub id: String,
    pub execution_order: Vec<String>,
    pub parallel_groups: Vec<Vec<String>>,
    pub dependency_map: BTreeMap<String, Vec<String>>,
    pub estimated_total_time_ms: u64,
    pub max_concurrency: usize,
    pub execution_mode: ExecutionMode,
}

// ============================================================================
// Planner
// ============================================================================

/// Builds validation plans from a registry.
#[derive(Debug, Clone, Default)]
pub struct ValidationPlanner {
    config: PlannerConfig,
}

impl ValidationPlanner {
    /// Create a planner.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Planner settings.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build a plan for `ctx`.
    ///
    /// `cache` is only consulted for hit-probability reordering.
    pub fn plan(
        &self,
        registry: &GateRegistry,
        ctx: &ValidationContext,
        cache: Option<&dyn ResultCache>,
    ) -> CoreResult<ValidationPlan> {
        let selected = self.select(registry, ctx);
        let execution_order = registry.execution_order_for(&selected)?;
        let mut parallel_groups = registry.parallel_groups_for(&selected)?;

        let mut gates = Vec::with_capacity(execution_order.len());
        for name in &execution_order {
            let Some(gate) = registry.get(name) else {
                continue;
            };
            gates.push(PlannedGate {
                gate: gate.clone(),
                validator: registry.validator_for(gate.gate_type),
                cache_key: cache_key(&ctx.target, gate),
                timeout: gate.effective_timeout(self.config.default_timeout),
            });
        }

        if let (true, Some(cache)) = (self.config.reorder_by_cache_probability, cache) {
            reorder_by_hit_probability(&mut parallel_groups, &gates, cache);
        }

        let dependency_map = gates
            .iter()
            .map(|g| {
                (
                    g.gate.name.clone(),
                    g.gate.dependencies.iter().cloned().collect(),
                )
            })
            .collect();

        let estimated_total_time = estimate_critical_path(&parallel_groups, &gates);
        let max_concurrency = self.concurrency_for(ctx);

        let plan = ValidationPlan {
            id: uuid::Uuid::new_v4().to_string(),
            gates,
            execution_order,
            parallel_groups,
            dependency_map,
            estimated_total_time,
            max_concurrency,
            execution_mode: self.config.execution_mode,
            dependency_policy: self.config.dependency_policy,
            stop_on_critical_failure: self.config.stop_on_critical_failure,
            created_at: Utc::now(),
        };

        info!(
            plan_id = %plan.id,
            gates = plan.len(),
            layers = plan.parallel_groups.len(),
            estimated_ms = plan.estimated_total_time.as_millis() as u64,
            max_concurrency = plan.max_concurrency,
            "validation plan built"
        );
        Ok(plan)
    }

    fn select(&self, registry: &GateRegistry, ctx: &ValidationContext) -> BTreeSet<String> {
        let mut selected: BTreeSet<String> = registry
            .gates()
            .filter(|g| g.enabled && ctx.requests(g.gate_type) && g.applies_to(ctx.target.kind))
            .map(|g| g.name.clone())
            .collect();

        if self.config.include_dependencies {
            let mut pending: Vec<String> = selected.iter().cloned().collect();
            while let Some(name) = pending.pop() {
                let Some(gate) = registry.get(&name) else {
                    continue;
                };
                for dep in &gate.dependencies {
                    let enabled = registry.get(dep).map_or(false, |d| d.enabled);
                    if enabled && selected.insert(dep.clone()) {
                        pending.push(dep.clone());
                    }
                }
            }
        }

        selected
    }

    fn concurrency_for(&self, ctx: &ValidationContext) -> usize {
        let mut limit = self.config.max_concurrency.max(1);
        if let Some(requested) = ctx.constraints.max_concurrency {
            limit = limit.min(requested.max(1));
        }
        if let Some(load) = ctx.constraints.system_load {
            if load >= self.config.high_load_threshold {
                let reduced = (limit / 2).max(1);
                info!(load, from = limit, to = reduced, "high system load, reducing concurrency");
                limit = reduced;
            }
        }
        limit
    }
}

/// Stable-sort each layer so likelier cache hits come first.
fn reorder_by_hit_probability(
    groups: &mut [Vec<String>],
    gates: &[PlannedGate],
    cache: &dyn ResultCache,
) {
    let probability: BTreeMap<&str, f64> = gates
        .iter()
        .map(|g| (g.gate.name.as_str(), cache.hit_probability(&g.cache_key)))
        .collect();
    for group in groups.iter_mut() {
        group.sort_by(|a, b| {
            let pa = probability.get(a.as_str()).copied().unwrap_or(0.0);
            let pb = probability.get(b.as_str()).copied().unwrap_or(0.0);
            pb.total_cmp(&pa)
        });
    }
}

fn estimate_critical_path(groups: &[Vec<String>], gates: &[PlannedGate]) -> Duration {
    groups
        .iter()
        .map(|group| {
            group
                .iter()
                .filter_map(|name| gates.iter().find(|g| &g.gate.name == name))
                .map(|g| g.timeout)
                .max()
                .unwrap_or_default()
        })
        .sum()
}

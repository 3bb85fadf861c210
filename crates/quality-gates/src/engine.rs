//! Execution Engine
//!
//! Runs a `ValidationPlan` and returns one `GateResult` per planned gate, in
//! plan order.
//!
//! Per gate: `Pending -> (dependency check) -> Ready -> Running ->
//! {Completed | Failed | TimedOut | Skipped}`.
//!
//! - A gate whose dependency has no usable result (absent or skipped) is
//!   skipped; the rest of the plan continues unless the plan asks for the
//!   abort-chain policy.
//! - A cache hit within TTL is reused without running the validator.
//! - Validators run as spawned tasks under a deadline of
//!   `min(gate timeout, remaining request budget)`. On expiry the engine stops
//!   waiting and the task is abandoned.
//! - Transient failures (timeouts, network-ish messages) get exactly one
//!   retry. Anything still failing becomes a synthesized failed result, so a
//!   single gate can never take the pipeline down.
//!
//! In parallel mode each layer is dispatched onto a semaphore-bounded set of
//! tasks and fully awaited before the next layer starts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use gatework_core::{CoreError, GateContext, GateStatus, GateValidator, ValidationContext, ValidatorOutput};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::derive_overall_status;
use crate::cache::ResultCache;
use crate::models::{
    DependencyPolicy, ExecutionMode, ExecutionResult, GateExecutionState, GatePriority, GateResult,
};
use crate::planner::{PlannedGate, ValidationPlan};
use crate::progress::ProgressTracker;

/// Validator invocations per gate (first attempt plus one retry).
const MAX_ATTEMPTS: u32 = 2;

/// Skip reason for gates that would start after the request budget ran out.
pub const DEADLINE_EXHAUSTED: &str = "validation deadline exhausted";

// ============================================================================
// Engine
// ============================================================================

/// Executes validation plans.
#[derive(Clone, Default)]
pub struct ExecutionEngine {
    cache: Option<Arc<dyn ResultCache>>,
    cache_ttl: Option<Duration>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("cache", &self.cache.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl ExecutionEngine {
    /// Create an engine without a cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result cache via builder pattern.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the TTL of results this engine writes.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Execute a plan.
    ///
    /// Never fails: every planned gate gets a result.
    pub async fn execute(
        &self,
        plan: &ValidationPlan,
        request: Arc<ValidationContext>,
        progress: &Arc<ProgressTracker>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let runner = GateRunner {
            cache: self.cache.clone(),
            cache_ttl: self.cache_ttl,
            deadline: request
                .constraints
                .timeout_ms
                .map(|ms| started + Duration::from_millis(ms)),
            request,
            progress: progress.clone(),
            halt: Halt::default(),
            dependency_policy: plan.dependency_policy,
            stop_on_critical_failure: plan.stop_on_critical_failure,
        };

        info!(
            plan_id = %plan.id,
            gates = plan.len(),
            mode = ?plan.execution_mode,
            max_concurrency = plan.max_concurrency,
            "executing validation plan"
        );
        progress.start(
            plan.execution_order.iter().cloned(),
            format!("Validating {} gates", plan.len()),
        );

        let (outcomes, parallel_execution_time) = match plan.execution_mode {
            ExecutionMode::Sequential => (self.run_sequential(plan, &runner).await, None),
            ExecutionMode::Parallel => {
                let (outcomes, layer_ms) = self.run_parallel(plan, &runner).await;
                (outcomes, Some(layer_ms))
            }
        };

        let mut states = BTreeMap::new();
        let mut gate_results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            states.insert(outcome.result.gate.clone(), outcome.state);
            gate_results.push(outcome.result);
        }

        let overall_status = derive_overall_status(&gate_results);
        let cache_hits = gate_results.iter().filter(|r| r.cache_hit).count();
        let execution_time = started.elapsed().as_millis() as u64;
        let halted = runner.halt.reason();

        progress.complete(format!("Validation {}", overall_status));
        info!(
            plan_id = %plan.id,
            overall = %overall_status,
            execution_ms = execution_time,
            cache_hits,
            "validation plan finished"
        );

        ExecutionResult {
            gate_results,
            overall_status,
            execution_time,
            parallel_execution_time,
            states,
            cache_hits,
            halted,
        }
    }

    async fn run_sequential(&self, plan: &ValidationPlan, runner: &GateRunner) -> Vec<GateOutcome> {
        let mut resolved: HashMap<String, GateStatus> = HashMap::new();
        let mut outcomes = Vec::with_capacity(plan.len());

        for planned in &plan.gates {
            let outcome = match runner.precheck(planned, &resolved) {
                Some(skipped) => skipped,
                None => runner.run(planned.clone()).await,
            };
            resolved.insert(planned.gate.name.clone(), outcome.result.status);
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_parallel(&self, plan: &ValidationPlan, runner: &GateRunner) -> (Vec<GateOutcome>, u64) {
        let semaphore = Arc::new(Semaphore::new(plan.max_concurrency.max(1)));
        let mut slots: Vec<Option<GateOutcome>> = (0..plan.len()).map(|_| None).collect();
        let mut resolved: HashMap<String, GateStatus> = HashMap::new();
        let total_layers = plan.parallel_groups.len();
        let mut layers_ms = 0u64;

        for (layer_idx, group) in plan.parallel_groups.iter().enumerate() {
            runner
                .progress
                .set_step(format!("Layer {}/{}", layer_idx + 1, total_layers));
            let layer_started = Instant::now();

            let mut handles = Vec::new();
            for name in group {
                let Some(idx) = plan.position(name) else {
                    continue;
                };
                let planned = &plan.gates[idx];
                if let Some(skipped) = runner.precheck(planned, &resolved) {
                    slots[idx] = Some(skipped);
                    continue;
                }

                let sem = semaphore.clone();
                let runner = runner.clone();
                let planned = planned.clone();
                let task = tokio::spawn(async move {
                    // The semaphore is never closed.
                    let _permit = sem.acquire_owned().await.ok();
                    runner.run(planned).await
                });
                handles.push(async move { (idx, task.await) });
            }

            // Wait for every task in this layer
            for (idx, joined) in join_all(handles).await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let gate = &plan.gates[idx].gate;
                        let err = CoreError::internal(format!("gate task failed: {e}"));
                        warn!(gate = %gate.name, error = %err, "gate task did not complete");
                        runner.progress.gate_finished(&gate.name, GateExecutionState::Failed, 0);
                        GateOutcome {
                            result: GateResult::fallback_failure(gate, &err, 0, 0),
                            state: GateExecutionState::Failed,
                        }
                    }
                };
                slots[idx] = Some(outcome);
            }

            for name in group {
                if let Some(outcome) = plan.position(name).and_then(|idx| slots[idx].as_ref()) {
                    resolved.insert(name.clone(), outcome.result.status);
                }
            }
            let layer_ms = layer_started.elapsed().as_millis() as u64;
            debug!(layer = layer_idx, gates = group.len(), layer_ms, "layer resolved");
            layers_ms += layer_ms;
        }

        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| runner.skip(&plan.gates[idx], "gate was not scheduled in any layer"))
            })
            .collect();
        (outcomes, layers_ms)
    }
}

// ============================================================================
// Per-Gate Execution
// ============================================================================

/// Final result and lifecycle state of one gate.
#[derive(Debug)]
struct GateOutcome {
    result: GateResult,
    state: GateExecutionState,
}

/// Halt signal scoped to one execution. The first reason wins.
#[derive(Clone, Default)]
struct Halt {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl Halt {
    fn trigger(&self, reason: String) {
        let mut current = self.reason.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_none() {
            warn!(reason = %reason, "halting validation");
            *current = Some(reason);
        }
        self.token.cancel();
    }

    fn is_halted(&self) -> bool {
        self.token.is_cancelled()
    }

    fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Everything a gate task needs; cheap to clone into spawned tasks.
#[derive(Clone)]
struct GateRunner {
    cache: Option<Arc<dyn ResultCache>>,
    cache_ttl: Option<Duration>,
    request: Arc<ValidationContext>,
    progress: Arc<ProgressTracker>,
    halt: Halt,
    deadline: Option<Instant>,
    dependency_policy: DependencyPolicy,
    stop_on_critical_failure: bool,
}

impl GateRunner {
    /// Checks done before a gate is dispatched. Returns the skip outcome if
    /// the gate must not run.
    fn precheck(
        &self,
        planned: &PlannedGate,
        resolved: &HashMap<String, GateStatus>,
    ) -> Option<GateOutcome> {
        if let Some(skipped) = self.halted_or_expired(planned) {
            return Some(skipped);
        }

        let unmet = planned.gate.dependencies.iter().find(|dep| {
            matches!(resolved.get(dep.as_str()), None | Some(GateStatus::Skipped))
        });
        if let Some(dep) = unmet {
            let err = CoreError::DependencyUnmet {
                gate: planned.gate.name.clone(),
                dependency: dep.clone(),
            };
            info!(gate = %planned.gate.name, dependency = %dep, "dependency unmet, skipping gate");
            if self.dependency_policy == DependencyPolicy::AbortChain {
                self.halt.trigger(format!(
                    "dependency '{}' of gate '{}' has no result",
                    dep, planned.gate.name
                ));
            }
            return Some(self.skip(planned, err.to_string()));
        }

        self.progress.mark_gate(&planned.gate.name, GateExecutionState::Ready);
        None
    }

    fn halted_or_expired(&self, planned: &PlannedGate) -> Option<GateOutcome> {
        if self.halt.is_halted() {
            let reason = self.halt.reason().unwrap_or_default();
            return Some(self.skip(planned, format!("halted: {reason}")));
        }
        if self.budget(planned.timeout).is_none() {
            return Some(self.skip(planned, DEADLINE_EXHAUSTED));
        }
        None
    }

    fn skip(&self, planned: &PlannedGate, reason: impl Into<String>) -> GateOutcome {
        self.progress
            .gate_finished(&planned.gate.name, GateExecutionState::Skipped, 0);
        GateOutcome {
            result: GateResult::skipped(&planned.gate, reason),
            state: GateExecutionState::Skipped,
        }
    }

    /// Deadline for the next attempt, or `None` once the request budget is spent.
    fn budget(&self, gate_timeout: Duration) -> Option<Duration> {
        match self.deadline {
            None => Some(gate_timeout),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then(|| gate_timeout.min(remaining))
            }
        }
    }

    async fn run(&self, planned: PlannedGate) -> GateOutcome {
        // Re-checked here: a halt or the deadline may have landed while
        // this task waited for a permit.
        if let Some(skipped) = self.halted_or_expired(&planned) {
            return skipped;
        }

        let outcome = self.resolve(&planned).await;

        if self.stop_on_critical_failure
            && planned.gate.priority == GatePriority::Critical
            && outcome.result.status == GateStatus::Failed
        {
            self.halt
                .trigger(format!("critical gate '{}' failed", planned.gate.name));
        }
        outcome
    }

    async fn resolve(&self, planned: &PlannedGate) -> GateOutcome {
        let name = planned.gate.name.as_str();

        if let Some(hit) = self.cached(planned) {
            // A cached fallback keeps reporting the failure it stands for.
            let state = if hit.is_fallback() {
                GateExecutionState::Failed
            } else {
                GateExecutionState::Completed
            };
            debug!(gate = %name, ?state, "cache hit");
            self.progress.gate_finished(name, state, 0);
            return GateOutcome {
                result: hit.as_cache_hit(),
                state,
            };
        }

        let Some(validator) = planned.validator.clone() else {
            info!(gate = %name, gate_type = %planned.gate.gate_type, "no validator registered, skipping gate");
            return self.skip(
                planned,
                format!("no validator registered for gate type '{}'", planned.gate.gate_type),
            );
        };

        self.progress.gate_started(name);
        let started = Instant::now();
        let gate_ctx = planned.context(self.request.clone());

        let mut attempts = 0u32;
        let mut output: Option<ValidatorOutput> = None;
        let mut last_error: Option<CoreError> = None;
        while attempts < MAX_ATTEMPTS {
            let Some(timeout) = self.budget(planned.timeout) else {
                break;
            };
            attempts += 1;
            match invoke(validator.clone(), gate_ctx.clone(), name, timeout).await {
                Ok(out) => {
                    output = Some(out);
                    break;
                }
                Err(err) => {
                    let retry = err.is_transient() && attempts < MAX_ATTEMPTS;
                    if retry {
                        warn!(gate = %name, error = %err, "transient gate failure, retrying");
                    } else {
                        warn!(gate = %name, error = %err, attempts, "gate failed");
                    }
                    last_error = Some(err);
                    if !retry {
                        break;
                    }
                }
            }
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, state) = match (output, last_error) {
            (Some(out), _) => (
                GateResult::from_output(&planned.gate, out, elapsed_ms, attempts),
                GateExecutionState::Completed,
            ),
            (None, Some(err)) => {
                let state = match err {
                    CoreError::Timeout { .. } => GateExecutionState::TimedOut,
                    _ => GateExecutionState::Failed,
                };
                (
                    GateResult::fallback_failure(&planned.gate, &err, elapsed_ms, attempts),
                    state,
                )
            }
            // Budget ran out between dispatch and the first attempt.
            (None, None) => return self.skip(planned, DEADLINE_EXHAUSTED),
        };

        self.store(planned, &result);
        self.progress.gate_finished(name, state, elapsed_ms);
        debug!(gate = %name, status = %result.status, elapsed_ms, attempts, "gate resolved");
        GateOutcome { result, state }
    }

    fn cached(&self, planned: &PlannedGate) -> Option<GateResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(&planned.cache_key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(gate = %planned.gate.name, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    fn store(&self, planned: &PlannedGate, result: &GateResult) {
        if result.status == GateStatus::Skipped {
            return;
        }
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.set(&planned.cache_key, result.clone(), self.cache_ttl) {
            warn!(gate = %planned.gate.name, error = %e, "cache write failed");
        }
    }
}

/// Run one validator attempt as its own task under `timeout`.
///
/// On timeout the task is left running; its eventual output is dropped.
async fn invoke(
    validator: Arc<dyn GateValidator>,
    gate_ctx: GateContext,
    gate: &str,
    timeout: Duration,
) -> Result<ValidatorOutput, CoreError> {
    let task = tokio::spawn(async move { validator.validate(&gate_ctx).await });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CoreError::validator(
            gate,
            format!("validator panicked: {join_err}"),
        )),
        Err(_) => Err(CoreError::timeout(gate, timeout.as_millis() as u64)),
    }
}

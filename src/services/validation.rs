//! Quality Gate Service
//!
//! Owns one gate registry, one shared result cache, and the planner, engine
//! and aggregator built from a `PipelineConfig`. Each validation:
//!
//! 1. Plans under a read lock on the registry (the plan is a snapshot)
//! 2. Executes the plan with the lock released
//! 3. Aggregates the results into a report
//!
//! Registry changes made while a validation runs only affect later plans.

use std::sync::Arc;

use gatework_core::{CoreResult, GateValidator, ValidationContext};
use gatework_quality_gates::{
    AggregateReport, CacheManager, ExecutionEngine, ExecutionResult, Gate, GateRegistry,
    PipelineConfig, PlanSummary, ProgressTracker, ResultAggregator, ResultCache, ValidationPlan,
    ValidationPlanner,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one validation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub plan_id: String,
    pub plan: PlanSummary,
    pub execution: ExecutionResult,
    pub report: AggregateReport,
}

/// Facade over the validation pipeline.
pub struct QualityGateService {
    config: PipelineConfig,
    registry: RwLock<GateRegistry>,
    cache: Arc<CacheManager>,
    planner: ValidationPlanner,
    engine: ExecutionEngine,
    aggregator: ResultAggregator,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for QualityGateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGateService")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

impl QualityGateService {
    /// Create a service with an empty registry.
    pub fn new(config: PipelineConfig) -> CoreResult<Self> {
        config.validate()?;
        let cache = Arc::new(CacheManager::new(config.cache.clone()));
        let engine = ExecutionEngine::new().with_cache(cache.clone());
        Ok(Self {
            planner: ValidationPlanner::new(config.planner_config()),
            registry: RwLock::new(GateRegistry::new()),
            cache,
            engine,
            aggregator: ResultAggregator::new(),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared result cache.
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Start the periodic cache expiry sweep. Stops when the service is dropped.
    pub fn start_cache_sweeper(&self) -> JoinHandle<()> {
        self.cache
            .spawn_sweeper(self.config.cache.sweep_interval(), self.shutdown.child_token())
    }

    // ========================================================================
    // Registry Management
    // ========================================================================

    /// Register a gate.
    pub async fn register_gate(&self, gate: Gate) -> CoreResult<()> {
        let name = gate.name.clone();
        self.registry.write().await.register(gate)?;
        debug!(gate = %name, "gate registered");
        Ok(())
    }

    /// Register several gates at once; all or nothing.
    pub async fn register_gates(&self, gates: Vec<Gate>) -> CoreResult<()> {
        let count = gates.len();
        self.registry.write().await.register_batch(gates)?;
        debug!(count, "gates registered");
        Ok(())
    }

    /// Register the validator serving its gate type.
    pub async fn register_validator(&self, validator: Arc<dyn GateValidator>) {
        let gate_type = validator.gate_type();
        let replaced = self.registry.write().await.register_validator(validator);
        debug!(%gate_type, replaced = replaced.is_some(), "validator registered");
    }

    /// Apply the configured gate selection and overrides to the registry.
    pub async fn apply_config(&self) -> CoreResult<()> {
        self.config.apply(&mut *self.registry.write().await)
    }

    /// Enable or disable a gate for subsequent plans.
    pub async fn set_gate_enabled(&self, name: &str, enabled: bool) -> CoreResult<()> {
        self.registry.write().await.set_enabled(name, enabled)?;
        info!(gate = %name, enabled, "gate toggled");
        Ok(())
    }

    /// Merge a partial configuration into a gate.
    ///
    /// Cached results computed under the old configuration can no longer be
    /// hit (the key covers the configuration), so this gate's entries are
    /// dropped. Entries of other gates are untouched.
    pub async fn update_gate_configuration(&self, name: &str, patch: Value) -> CoreResult<()> {
        self.registry.write().await.update_configuration(name, patch)?;
        let dropped = self.cache.invalidate_gate(name);
        info!(gate = %name, dropped, "gate configuration updated");
        Ok(())
    }

    /// Execution order over every registered gate.
    pub async fn execution_order(&self) -> CoreResult<Vec<String>> {
        self.registry.read().await.compute_execution_order()
    }

    /// Parallel layers over every registered gate.
    pub async fn parallel_groups(&self) -> CoreResult<Vec<Vec<String>>> {
        self.registry.read().await.compute_parallel_groups()
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Build a plan for a request without running it.
    pub async fn plan(&self, ctx: &ValidationContext) -> CoreResult<ValidationPlan> {
        let registry = self.registry.read().await;
        self.planner.plan(&registry, ctx, Some(self.cache.as_ref() as &dyn ResultCache))
    }

    /// Validate a request.
    pub async fn validate(&self, ctx: ValidationContext) -> CoreResult<ValidationReport> {
        self.validate_with_progress(ctx, Arc::new(ProgressTracker::new()))
            .await
    }

    /// Validate a request, reporting progress to `progress`.
    ///
    /// Fails only when no plan can be built (e.g. a dependency cycle); gate
    /// failures are part of the report.
    pub async fn validate_with_progress(
        &self,
        ctx: ValidationContext,
        progress: Arc<ProgressTracker>,
    ) -> CoreResult<ValidationReport> {
        let plan = self.plan(&ctx).await?;
        let execution = self
            .engine
            .execute(&plan, Arc::new(ctx), &progress)
            .await;
        let report = self.aggregator.aggregate(&execution);

        info!(
            plan_id = %plan.id,
            overall = %report.overall_status,
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            "validation finished"
        );

        Ok(ValidationReport {
            plan_id: plan.id.clone(),
            plan: plan.summary(),
            execution,
            report,
        })
    }
}

impl Drop for QualityGateService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

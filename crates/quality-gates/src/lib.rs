//! Gatework Quality Gates
//!
//! Scheduling and bookkeeping for quality-gate validation:
//!
//! - `models` - Gate definitions, per-gate results and execution results
//! - `registry` - Gate catalog, validator lookup, execution order and parallel layers
//! - `planner` - Builds a `ValidationPlan` for one request
//! - `engine` - Executes plans (sequential or layered parallel) with timeouts and retries
//! - `cache` - TTL + LRU result cache (`CacheManager`) behind the `ResultCache` trait
//! - `progress` - Progress state and listener fan-out
//! - `aggregator` - Overall status and performance report
//! - `config` - Pipeline configuration surface
//!
//! Validators themselves are not part of this crate; they implement
//! `gatework_core::GateValidator` and are registered by type tag.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod engine;
pub mod models;
pub mod planner;
pub mod progress;
pub mod registry;

// Re-export model types
pub use models::{
    DependencyPolicy, ExecutionMode, ExecutionResult, Gate, GateExecutionState, GatePriority,
    GateResult,
};

// Re-export scheduling types
pub use engine::{ExecutionEngine, DEADLINE_EXHAUSTED};
pub use planner::{PlanSummary, PlannedGate, PlannerConfig, ValidationPlan, ValidationPlanner};
pub use registry::GateRegistry;

// Re-export cache
pub use cache::{cache_key, CacheConfig, CacheEntry, CacheManager, CacheStats, ResultCache};

// Re-export progress
pub use progress::{
    GateProgress, ListenerId, ProgressEvent, ProgressEventKind, ProgressListener, ProgressState,
    ProgressTracker,
};

// Re-export aggregation and configuration
pub use aggregator::{derive_overall_status, AggregateReport, PerformanceReport, ResultAggregator};
pub use config::{GateOverride, PipelineConfig};

//! Gatework
//!
//! Quality-gate validation pipeline. A request names a target and, optionally,
//! a subset of gate types; the pipeline plans the matching gates in
//! dependency order, runs them with bounded concurrency, reuses cached
//! results, and reports an overall verdict.
//!
//! - `gatework_core` - errors, request context and the validator contract
//! - `gatework_quality_gates` - registry, planner, engine, cache, progress, aggregation
//! - `services` - `QualityGateService`, the facade tying them together

pub mod services;

pub use gatework_core::{
    Constraints, CoreError, CoreResult, FnValidator, GateContext, GateStatus, GateType,
    GateValidator, Issue, IssueSeverity, Scope, Target, TargetKind, ValidationContext,
    ValidatorOutput,
};
pub use gatework_quality_gates::{
    AggregateReport, CacheConfig, CacheManager, DependencyPolicy, ExecutionMode, ExecutionResult,
    Gate, GatePriority, GateResult, PerformanceReport, PipelineConfig, ProgressEvent,
    ProgressTracker,
};
pub use services::{QualityGateService, ValidationReport};

//! Pipeline Integration Tests
//!
//! Drive the full request path: registry -> planner -> engine -> aggregator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatework::{
    Constraints, CoreError, CoreResult, ExecutionMode, FnValidator, Gate, GateContext,
    GatePriority, GateStatus, GateType, GateValidator, Issue, IssueSeverity, PipelineConfig,
    ProgressEvent, ProgressTracker, QualityGateService, Target, TargetKind, ValidationContext,
    ValidatorOutput,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn file_request() -> ValidationContext {
    ValidationContext::new(Target::new(TargetKind::File, "src/app.ts").with_files(["src/app.ts"]))
}

/// Validator that sleeps for the gate's `sleepMs` and passes.
fn sleeper(gate_type: GateType) -> Arc<FnValidator> {
    Arc::new(FnValidator::new(gate_type.as_str(), gate_type, |ctx: GateContext| async move {
        let ms = ctx.config_value("sleepMs").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ValidatorOutput::passed(95.0))
    }))
}

async fn service_with(config: PipelineConfig) -> QualityGateService {
    let service = QualityGateService::new(config).unwrap();
    for gate_type in GateType::ALL {
        service.register_validator(sleeper(gate_type)).await;
    }
    service
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_fan_out_plan_and_run() {
    let service = service_with(PipelineConfig::default()).await;
    service
        .register_gates(vec![
            Gate::new("A", GateType::Syntax),
            Gate::new("B", GateType::Lint).depends_on("A"),
            Gate::new("C", GateType::Security).depends_on("A"),
        ])
        .await
        .unwrap();

    let order = service.execution_order().await.unwrap();
    assert_eq!(order[0], "A");
    let groups = service.parallel_groups().await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0], vec!["A"]);
    let mut second = groups[1].clone();
    second.sort();
    assert_eq!(second, vec!["B", "C"]);

    let report = service.validate(file_request()).await.unwrap();
    assert_eq!(report.plan.parallel_groups.len(), 2);
    assert_eq!(report.report.overall_status, GateStatus::Passed);
    assert_eq!(report.report.total, 3);
    let names: Vec<&str> = report.execution.gate_results.iter().map(|r| r.gate.as_str()).collect();
    assert_eq!(names, report.plan.execution_order.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cyclic_batch_is_rejected_and_registry_stays_usable() {
    let service = service_with(PipelineConfig::default()).await;
    let err = service
        .register_gates(vec![
            Gate::new("x", GateType::Lint).depends_on("y"),
            Gate::new("y", GateType::Test).depends_on("x"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CycleDetected { .. }));

    service.register_gate(Gate::new("x", GateType::Lint)).await.unwrap();
    let report = service.validate(file_request()).await.unwrap();
    assert_eq!(report.report.passed, 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_independent_gates_run_on_the_critical_path() {
    let service = service_with(PipelineConfig {
        max_concurrency: 2,
        ..PipelineConfig::default()
    })
    .await;
    service
        .register_gates(vec![
            Gate::new("a", GateType::Lint)
                .with_timeout(Duration::from_millis(50))
                .with_config("sleepMs", serde_json::json!(45)),
            Gate::new("b", GateType::Test)
                .with_timeout(Duration::from_millis(100))
                .with_config("sleepMs", serde_json::json!(95)),
            Gate::new("c", GateType::Security)
                .with_timeout(Duration::from_millis(30))
                .with_config("sleepMs", serde_json::json!(25)),
        ])
        .await
        .unwrap();

    let report = service.validate(file_request()).await.unwrap();
    assert_eq!(report.plan.estimated_total_time_ms, 100);
    assert_eq!(report.execution.gate_results.len(), 3);
    assert_eq!(report.report.passed, 3);

    let wall = report.execution.execution_time;
    assert!(wall >= 95 && wall < 180, "wall time {wall}ms");
    assert!(report.report.performance.parallel_speedup > 1.0);
}

#[tokio::test]
async fn test_high_load_halves_concurrency() {
    let service = service_with(PipelineConfig {
        max_concurrency: 6,
        ..PipelineConfig::default()
    })
    .await;
    service.register_gate(Gate::new("lint", GateType::Lint)).await.unwrap();

    let loaded = file_request().with_constraints(Constraints {
        system_load: Some(0.9),
        ..Constraints::default()
    });
    assert_eq!(service.plan(&loaded).await.unwrap().max_concurrency, 3);
    assert_eq!(service.plan(&file_request()).await.unwrap().max_concurrency, 6);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_failing_gate_is_isolated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = service_with(PipelineConfig::default()).await;
    let counter = calls.clone();
    service
        .register_validator(Arc::new(FnValidator::new("network", GateType::Integration, move |ctx: GateContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::validator(ctx.gate_name(), "Service temporarily unavailable"))
            }
        })))
        .await;
    service
        .register_gates(vec![
            Gate::new("syntax", GateType::Syntax),
            Gate::new("contract", GateType::Integration),
            Gate::new("lint", GateType::Lint).depends_on("syntax"),
        ])
        .await
        .unwrap();

    let report = service.validate(file_request()).await.unwrap();
    assert_eq!(report.execution.gate_results.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let contract = report.execution.result_for("contract").unwrap();
    assert_eq!(contract.status, GateStatus::Failed);
    assert_eq!(contract.score, 0.0);
    assert!(contract.issues[0].message.contains("contract"));

    assert_eq!(report.execution.result_for("syntax").unwrap().status, GateStatus::Passed);
    assert_eq!(report.execution.result_for("lint").unwrap().status, GateStatus::Passed);
    assert_eq!(report.report.overall_status, GateStatus::Failed);
    assert_eq!(report.report.critical_issues, 1);
}

#[tokio::test]
async fn test_warning_verdict_matches_across_modes() {
    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let service = service_with(PipelineConfig {
            execution_mode: mode,
            ..PipelineConfig::default()
        })
        .await;
        service
            .register_validator(Arc::new(FnValidator::new("docs", GateType::Documentation, |_| async {
                Ok(ValidatorOutput::warning(
                    80.0,
                    vec![Issue::new(IssueSeverity::Low, "missing doc comment").at("src/app.ts", 3)],
                ))
            })))
            .await;
        service
            .register_gates(vec![
                Gate::new("syntax", GateType::Syntax),
                Gate::new("docs", GateType::Documentation).depends_on("syntax"),
            ])
            .await
            .unwrap();

        let report = service.validate(file_request()).await.unwrap();
        assert_eq!(report.report.overall_status, GateStatus::Warning, "{mode:?}");
        assert_eq!(report.report.warnings, 1);
        assert_eq!(
            report.execution.parallel_execution_time.is_some(),
            mode == ExecutionMode::Parallel
        );
    }
}

#[tokio::test]
async fn test_stop_on_critical_failure() {
    let service = service_with(PipelineConfig {
        stop_on_critical_failure: true,
        ..PipelineConfig::default()
    })
    .await;
    service
        .register_validator(Arc::new(FnValidator::new("audit", GateType::Security, |_| async {
            Ok(ValidatorOutput::failed(
                10.0,
                vec![Issue::new(IssueSeverity::Critical, "hardcoded credential")],
            ))
        })))
        .await;
    service
        .register_gates(vec![
            Gate::new("audit", GateType::Security).with_priority(GatePriority::Critical),
            Gate::new("tests", GateType::Test).depends_on("audit"),
        ])
        .await
        .unwrap();

    let report = service.validate(file_request()).await.unwrap();
    assert_eq!(report.execution.result_for("tests").unwrap().status, GateStatus::Skipped);
    assert!(report.execution.halted.is_some());
    assert_eq!(report.report.skipped, 1);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_toml_config_selects_and_overrides_gates() {
    let config = PipelineConfig::from_toml_str(
        r#"
        enabledGates = ["syntax", "lint"]
        executionMode = "sequential"

        [gates.lint]
        priority = "critical"
        "#,
    )
    .unwrap();
    let service = service_with(config).await;
    service
        .register_gates(vec![
            Gate::new("syntax", GateType::Syntax),
            Gate::new("lint", GateType::Lint),
            Gate::new("perf", GateType::Performance),
        ])
        .await
        .unwrap();
    service.apply_config().await.unwrap();

    let plan = service.plan(&file_request()).await.unwrap();
    assert_eq!(plan.execution_order, vec!["lint", "syntax"]);
    assert_eq!(plan.execution_mode, ExecutionMode::Sequential);

    service.set_gate_enabled("perf", true).await.unwrap();
    let plan = service.plan(&file_request()).await.unwrap();
    assert_eq!(plan.len(), 3);
}

#[tokio::test]
async fn test_requested_gate_types_filter_the_plan() {
    let service = service_with(PipelineConfig::default()).await;
    service
        .register_gates(vec![
            Gate::new("syntax", GateType::Syntax),
            Gate::new("types", GateType::Type).depends_on("syntax"),
            Gate::new("docs", GateType::Documentation).for_targets(vec![TargetKind::Project]),
        ])
        .await
        .unwrap();

    let ctx = file_request().with_gates(vec![GateType::Type, GateType::Documentation]);
    let report = service.validate(ctx).await.unwrap();
    assert_eq!(report.plan.execution_order, vec!["syntax", "types"]);
}

/// Fails when the target names more files than the gate's `maxFiles`.
struct FileBudget;

#[async_trait]
impl GateValidator for FileBudget {
    fn name(&self) -> &str {
        "file-budget"
    }

    fn gate_type(&self) -> GateType {
        GateType::Performance
    }

    async fn validate(&self, ctx: &GateContext) -> CoreResult<ValidatorOutput> {
        let limit = ctx.config_value("maxFiles").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let files = ctx.target().files.len();
        if files > limit {
            Ok(ValidatorOutput::failed(
                50.0,
                vec![Issue::new(
                    IssueSeverity::High,
                    format!("{files} files exceed the budget of {limit}"),
                )],
            ))
        } else {
            Ok(ValidatorOutput::passed(100.0))
        }
    }
}

#[tokio::test]
async fn test_trait_validator_reads_target_and_config() {
    let service = service_with(PipelineConfig::default()).await;
    service.register_validator(Arc::new(FileBudget)).await;
    service
        .register_gate(Gate::new("budget", GateType::Performance).with_config("maxFiles", serde_json::json!(1)))
        .await
        .unwrap();

    let report = service.validate(file_request()).await.unwrap();
    assert_eq!(report.report.overall_status, GateStatus::Passed);

    let wide = ValidationContext::new(Target::new(TargetKind::Directory, "src").with_files(["a.ts", "b.ts"]));
    let report = service.validate(wide).await.unwrap();
    let budget = report.execution.result_for("budget").unwrap();
    assert_eq!(budget.status, GateStatus::Failed);
    assert!(budget.issues[0].message.contains("2 files"));
}

// ============================================================================
// Progress & Serialization
// ============================================================================

#[tokio::test]
async fn test_progress_listeners_are_isolated() {
    let service = service_with(PipelineConfig::default()).await;
    service
        .register_gates(vec![
            Gate::new("syntax", GateType::Syntax),
            Gate::new("lint", GateType::Lint).depends_on("syntax"),
        ])
        .await
        .unwrap();

    let progress = Arc::new(ProgressTracker::new());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    progress.subscribe(Arc::new(|_: &ProgressEvent| panic!("listener bug")));
    progress.subscribe(Arc::new(move |_: &ProgressEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let report = service
        .validate_with_progress(file_request(), progress.clone())
        .await
        .unwrap();
    assert_eq!(report.report.overall_status, GateStatus::Passed);
    assert!(seen.load(Ordering::SeqCst) >= 4);
    assert_eq!(progress.percent(), 100.0);
}

#[tokio::test]
async fn test_report_serializes_in_camel_case() {
    let service = service_with(PipelineConfig::default()).await;
    service.register_gate(Gate::new("lint", GateType::Lint)).await.unwrap();

    let report = service.validate(file_request()).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["execution"]["overallStatus"], "passed");
    assert_eq!(json["execution"]["gateResults"][0]["type"], "lint");
    assert!(json["execution"]["gateResults"][0]["processingTime"].is_u64());
    assert!(json["execution"]["executionTime"].is_u64());
    assert_eq!(json["report"]["performance"]["cacheHits"], 0);
    assert_eq!(json["planId"], report.plan_id);
}

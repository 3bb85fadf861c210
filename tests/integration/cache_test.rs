//! Result Cache Integration Tests
//!
//! Cache behavior as seen through repeated validations, with the tokio clock
//! paused so TTL boundaries are exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatework::{
    CacheConfig, FnValidator, Gate, GateContext, GateType, PipelineConfig, QualityGateService,
    Target, TargetKind, ValidationContext, ValidatorOutput,
};

fn counting_service(ttl_ms: u64, max_entries: usize) -> (QualityGateService, Arc<AtomicUsize>) {
    let config = PipelineConfig {
        cache: CacheConfig {
            ttl_ms,
            max_entries,
            ..CacheConfig::default()
        },
        ..PipelineConfig::default()
    };
    (QualityGateService::new(config).unwrap(), Arc::new(AtomicUsize::new(0)))
}

async fn register_counting_lint(service: &QualityGateService, calls: &Arc<AtomicUsize>) {
    let calls = calls.clone();
    service
        .register_validator(Arc::new(FnValidator::new("lint", GateType::Lint, move |_: GateContext| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ValidatorOutput::passed(100.0))
            }
        })))
        .await;
    service.register_gate(Gate::new("lint", GateType::Lint)).await.unwrap();
}

fn request(uri: &str) -> ValidationContext {
    ValidationContext::new(Target::new(TargetKind::File, uri))
}

#[tokio::test(start_paused = true)]
async fn test_ttl_boundaries_through_the_pipeline() {
    let (service, calls) = counting_service(100, 100);
    register_counting_lint(&service, &calls).await;

    service.validate(request("a.rs")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(50)).await;
    let report = service.validate(request("a.rs")).await.unwrap();
    assert_eq!(report.execution.cache_hits, 1);
    assert!(report.execution.gate_results[0].cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(100)).await;
    let report = service.validate(request("a.rs")).await.unwrap();
    assert_eq!(report.execution.cache_hits, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = service.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.expirations, 1);
}

#[tokio::test]
async fn test_targets_do_not_share_cache_entries() {
    let (service, calls) = counting_service(60_000, 100);
    register_counting_lint(&service, &calls).await;

    service.validate(request("a.rs")).await.unwrap();
    service.validate(request("b.rs")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.cache().len(), 2);

    let report = service.validate(request("b.rs")).await.unwrap();
    assert_eq!(report.report.performance.cache_hits, 1);
    assert_eq!(report.report.performance.cache_hit_rate, 100.0);
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used_target() {
    let (service, calls) = counting_service(60_000, 2);
    register_counting_lint(&service, &calls).await;

    service.validate(request("a.rs")).await.unwrap();
    service.validate(request("b.rs")).await.unwrap();
    // Touch a.rs so b.rs becomes the eviction victim.
    service.validate(request("a.rs")).await.unwrap();
    service.validate(request("c.rs")).await.unwrap();
    assert_eq!(service.cache().len(), 2);
    assert_eq!(service.cache().stats().evictions, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    service.validate(request("a.rs")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    service.validate(request("b.rs")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_pattern_invalidation_by_gate_name() {
    let (service, calls) = counting_service(60_000, 100);
    register_counting_lint(&service, &calls).await;

    service.validate(request("a.rs")).await.unwrap();
    service.validate(request("b.rs")).await.unwrap();
    assert_eq!(service.cache().invalidate_pattern("lint:"), 2);

    service.validate(request("a.rs")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

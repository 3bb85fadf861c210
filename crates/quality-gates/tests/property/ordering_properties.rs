use std::collections::HashMap;

use gatework_core::{GateStatus, GateType, ValidatorOutput};
use gatework_quality_gates::{
    derive_overall_status, CacheConfig, CacheManager, Gate, GatePriority, GateRegistry, GateResult,
};
use proptest::prelude::*;

const PRIORITIES: [GatePriority; 4] = [
    GatePriority::Critical,
    GatePriority::High,
    GatePriority::Medium,
    GatePriority::Low,
];

/// Gate `i` depends on gate `j < i` when bit `j` of its mask is set, so the
/// graph is acyclic by construction.
fn build_registry(shape: &[(usize, u32)]) -> GateRegistry {
    let mut registry = GateRegistry::new();
    for (i, (priority, mask)) in shape.iter().enumerate() {
        let mut gate = Gate::new(format!("g{i}"), GateType::Lint).with_priority(PRIORITIES[*priority]);
        for j in 0..i {
            if mask & (1 << j) != 0 {
                gate = gate.depends_on(format!("g{j}"));
            }
        }
        registry.register(gate).unwrap();
    }
    registry
}

fn dag() -> impl Strategy<Value = Vec<(usize, u32)>> {
    prop::collection::vec((0usize..4, any::<u32>()), 1..16)
}

fn result_with(status: GateStatus) -> GateResult {
    let output = match status {
        GateStatus::Passed => ValidatorOutput::passed(100.0),
        GateStatus::Warning => ValidatorOutput::warning(60.0, vec![]),
        GateStatus::Failed => ValidatorOutput::failed(0.0, vec![]),
        GateStatus::Skipped => {
            return GateResult::skipped(&Gate::new("s", GateType::Lint), "skipped");
        }
    };
    GateResult::from_output(&Gate::new("g", GateType::Lint), output, 1, 1)
}

fn status() -> impl Strategy<Value = GateStatus> {
    prop_oneof![
        Just(GateStatus::Passed),
        Just(GateStatus::Warning),
        Just(GateStatus::Failed),
        Just(GateStatus::Skipped),
    ]
}

proptest! {
    #[test]
    fn execution_order_respects_dependencies(shape in dag()) {
        let registry = build_registry(&shape);
        let order = registry.compute_execution_order().unwrap();
        prop_assert_eq!(order.len(), shape.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        for gate in registry.gates() {
            for dep in &gate.dependencies {
                prop_assert!(
                    position[dep.as_str()] < position[gate.name.as_str()],
                    "{} ran before its dependency {}", gate.name, dep
                );
            }
        }
    }

    #[test]
    fn layers_place_dependencies_strictly_earlier(shape in dag()) {
        let registry = build_registry(&shape);
        let layers = registry.compute_parallel_groups().unwrap();

        let mut layer_of: HashMap<&str, usize> = HashMap::new();
        for (k, layer) in layers.iter().enumerate() {
            prop_assert!(!layer.is_empty());
            for name in layer {
                prop_assert!(layer_of.insert(name.as_str(), k).is_none(), "{} placed twice", name);
            }
        }
        prop_assert_eq!(layer_of.len(), shape.len());

        for gate in registry.gates() {
            let k = layer_of[gate.name.as_str()];
            if gate.dependencies.is_empty() {
                prop_assert_eq!(k, 0);
            }
            for dep in &gate.dependencies {
                prop_assert!(layer_of[dep.as_str()] < k);
            }
            // BFS layering: as early as the dependencies allow.
            let earliest = gate
                .dependencies
                .iter()
                .map(|d| layer_of[d.as_str()] + 1)
                .max()
                .unwrap_or(0);
            prop_assert_eq!(k, earliest);
        }
    }

    #[test]
    fn independent_gates_order_by_priority_then_registration(
        priorities in prop::collection::vec(0usize..4, 1..16)
    ) {
        let shape: Vec<(usize, u32)> = priorities.iter().map(|p| (*p, 0)).collect();
        let registry = build_registry(&shape);

        let mut expected: Vec<(usize, usize)> =
            priorities.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        expected.sort();
        let expected: Vec<String> = expected.into_iter().map(|(_, i)| format!("g{i}")).collect();

        prop_assert_eq!(registry.compute_execution_order().unwrap(), expected);
    }

    #[test]
    fn overall_status_is_order_independent(statuses in prop::collection::vec(status(), 0..20)) {
        let results: Vec<GateResult> = statuses.iter().map(|s| result_with(*s)).collect();
        let mut reversed = results.clone();
        reversed.reverse();
        let mut rotated = results.clone();
        if !rotated.is_empty() {
            rotated.rotate_left(statuses.len() / 2);
        }

        let overall = derive_overall_status(&results);
        prop_assert_eq!(overall, derive_overall_status(&reversed));
        prop_assert_eq!(overall, derive_overall_status(&rotated));

        let expected = if statuses.contains(&GateStatus::Failed) {
            GateStatus::Failed
        } else if statuses.contains(&GateStatus::Warning) {
            GateStatus::Warning
        } else {
            GateStatus::Passed
        };
        prop_assert_eq!(overall, expected);
    }

    #[test]
    fn full_cache_evicts_least_recently_accessed(
        capacity in 1usize..8,
        touches in prop::collection::vec(any::<prop::sample::Index>(), 0..20)
    ) {
        let cache = CacheManager::new(CacheConfig { max_entries: capacity, ..CacheConfig::default() });
        let value = result_with(GateStatus::Passed);
        let keys: Vec<String> = (0..capacity).map(|i| format!("k{i}")).collect();
        for key in &keys {
            cache.set(key, value.clone(), None).unwrap();
        }

        // Track recency independently: most recent at the back.
        let mut recency = keys.clone();
        for touch in &touches {
            let key = touch.get(&keys).clone();
            prop_assert!(cache.get(&key).unwrap().is_some());
            recency.retain(|k| k != &key);
            recency.push(key);
        }

        cache.set("new", value, None).unwrap();
        prop_assert_eq!(cache.len(), capacity);
        prop_assert!(!cache.contains(&recency[0]));
        for survivor in &recency[1..] {
            prop_assert!(cache.contains(survivor));
        }
        prop_assert!(cache.contains("new"));
    }
}

//! Gate Registry
//!
//! Catalog of gate definitions, their dependency graph, and the validators
//! that execute each gate type.
//!
//! Provides O(1) lookup by name and deterministic iteration in registration
//! order. Ordering and layering are computed on demand with Kahn's algorithm;
//! ties between ready gates are broken by priority, then registration order.
//!
//! The registry is an explicit value: callers construct one and pass it by
//! reference to the planner. Mutations (`set_enabled`, `update_configuration`)
//! affect the next plan built, never a plan already handed to the engine.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use gatework_core::{CoreError, CoreResult, GateType, GateValidator};
use serde_json::Value;
use tracing::debug;

use crate::models::{Gate, GatePriority};

/// Registry of gates and validators.
#[derive(Default)]
pub struct GateRegistry {
    gates: HashMap<String, Gate>,
    /// Insertion order for deterministic iteration and tie-breaking.
    order: Vec<String>,
    validators: HashMap<GateType, Arc<dyn GateValidator>>,
}

impl std::fmt::Debug for GateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut validator_types: Vec<_> = self.validators.keys().collect();
        validator_types.sort();
        f.debug_struct("GateRegistry")
            .field("gates", &self.order)
            .field("validators", &validator_types)
            .finish()
    }
}

impl GateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a gate.
    ///
    /// Fails if the name is taken or a dependency names a gate that is not
    /// registered yet. The registry is unchanged on failure.
    pub fn register(&mut self, gate: Gate) -> CoreResult<()> {
        if gate.name.trim().is_empty() {
            return Err(CoreError::config("Gate name must not be empty"));
        }
        if self.gates.contains_key(&gate.name) {
            return Err(CoreError::config(format!(
                "Gate '{}' is already registered",
                gate.name
            )));
        }
        for dep in &gate.dependencies {
            if !self.gates.contains_key(dep) {
                return Err(CoreError::config(format!(
                    "Gate '{}' depends on unknown gate '{}'",
                    gate.name, dep
                )));
            }
        }

        debug!(gate = %gate.name, gate_type = %gate.gate_type, "registered gate");
        self.order.push(gate.name.clone());
        self.gates.insert(gate.name.clone(), gate);
        Ok(())
    }

    /// Register several gates at once.
    ///
    /// Dependencies may reference gates later in the same batch. The batch is
    /// all-or-nothing: duplicate or unknown names fail with a configuration
    /// error and a cycle over the combined graph fails with `CycleDetected`.
    pub fn register_batch(&mut self, gates: Vec<Gate>) -> CoreResult<()> {
        let mut incoming: BTreeSet<&str> = BTreeSet::new();
        for gate in &gates {
            if gate.name.trim().is_empty() {
                return Err(CoreError::config("Gate name must not be empty"));
            }
            if self.gates.contains_key(&gate.name) || !incoming.insert(gate.name.as_str()) {
                return Err(CoreError::config(format!(
                    "Gate '{}' is already registered",
                    gate.name
                )));
            }
        }
        for gate in &gates {
            for dep in &gate.dependencies {
                if !self.gates.contains_key(dep) && !incoming.contains(dep.as_str()) {
                    return Err(CoreError::config(format!(
                        "Gate '{}' depends on unknown gate '{}'",
                        gate.name, dep
                    )));
                }
            }
        }

        let combined: Vec<&Gate> = self
            .order
            .iter()
            .filter_map(|name| self.gates.get(name))
            .chain(gates.iter())
            .collect();
        topological_order(&combined)?;

        for gate in gates {
            self.order.push(gate.name.clone());
            self.gates.insert(gate.name.clone(), gate);
        }
        Ok(())
    }

    /// Register the validator for its gate type. Returns the one it replaced.
    pub fn register_validator(
        &mut self,
        validator: Arc<dyn GateValidator>,
    ) -> Option<Arc<dyn GateValidator>> {
        debug!(
            validator = validator.name(),
            gate_type = %validator.gate_type(),
            "registered validator"
        );
        self.validators.insert(validator.gate_type(), validator)
    }

    /// Enabled validator for a gate type.
    pub fn validator_for(&self, gate_type: GateType) -> Option<Arc<dyn GateValidator>> {
        self.validators
            .get(&gate_type)
            .filter(|v| v.is_enabled())
            .cloned()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Look up a gate by name.
    pub fn get(&self, name: &str) -> Option<&Gate> {
        self.gates.get(name)
    }

    /// Check whether a gate is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.gates.contains_key(name)
    }

    /// Number of registered gates.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Gate names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Gates in registration order.
    pub fn gates(&self) -> impl Iterator<Item = &Gate> {
        self.order.iter().filter_map(move |name| self.gates.get(name))
    }

    /// Position of a gate in registration order.
    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// Gates that declare a direct dependency on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.gates()
            .filter(|g| g.dependencies.contains(name))
            .map(|g| g.name.clone())
            .collect()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Enable or disable a gate.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> CoreResult<()> {
        self.gate_mut(name)?.enabled = enabled;
        Ok(())
    }

    /// Change a gate's priority.
    pub fn set_priority(&mut self, name: &str, priority: GatePriority) -> CoreResult<()> {
        self.gate_mut(name)?.priority = priority;
        Ok(())
    }

    /// Change a gate's timeout.
    pub fn set_timeout(&mut self, name: &str, timeout: Duration) -> CoreResult<()> {
        if timeout.is_zero() {
            return Err(CoreError::config(format!(
                "Timeout for gate '{}' must be > 0",
                name
            )));
        }
        self.gate_mut(name)?.timeout_ms = Some(timeout.as_millis() as u64);
        Ok(())
    }

    /// Merge a partial configuration object into a gate's configuration.
    ///
    /// Top-level keys in `patch` replace existing keys; a `null` value removes
    /// the key.
    pub fn update_configuration(&mut self, name: &str, patch: Value) -> CoreResult<()> {
        let Value::Object(patch) = patch else {
            return Err(CoreError::config(format!(
                "Configuration update for gate '{}' must be a JSON object",
                name
            )));
        };
        let gate = self.gate_mut(name)?;
        for (key, value) in patch {
            if value.is_null() {
                gate.configuration.remove(&key);
            } else {
                gate.configuration.insert(key, value);
            }
        }
        Ok(())
    }

    fn gate_mut(&mut self, name: &str) -> CoreResult<&mut Gate> {
        self.gates
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(format!("Gate not found: {}", name)))
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Topological order over every registered gate.
    pub fn compute_execution_order(&self) -> CoreResult<Vec<String>> {
        topological_order(&self.all_nodes())
    }

    /// Dependency layers over every registered gate.
    pub fn compute_parallel_groups(&self) -> CoreResult<Vec<Vec<String>>> {
        parallel_layers(&self.all_nodes())
    }

    /// Topological order over a subset of gates.
    ///
    /// Dependencies outside the subset are ignored.
    pub fn execution_order_for(&self, names: &BTreeSet<String>) -> CoreResult<Vec<String>> {
        topological_order(&self.subset_nodes(names)?)
    }

    /// Dependency layers over a subset of gates.
    ///
    /// Dependencies outside the subset are ignored.
    pub fn parallel_groups_for(&self, names: &BTreeSet<String>) -> CoreResult<Vec<Vec<String>>> {
        parallel_layers(&self.subset_nodes(names)?)
    }

    fn all_nodes(&self) -> Vec<&Gate> {
        self.gates().collect()
    }

    fn subset_nodes(&self, names: &BTreeSet<String>) -> CoreResult<Vec<&Gate>> {
        if let Some(unknown) = names.iter().find(|n| !self.gates.contains_key(*n)) {
            return Err(CoreError::not_found(format!("Gate not found: {}", unknown)));
        }
        Ok(self.gates().filter(|g| names.contains(&g.name)).collect())
    }
}

// ============================================================================
// Graph Algorithms
// ============================================================================

/// Kahn's algorithm over `nodes` (given in registration order).
///
/// Among ready gates the one with the highest priority, then the earliest
/// registration, is emitted first.
fn topological_order(nodes: &[&Gate]) -> CoreResult<Vec<String>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, g)| (g.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, gate) in nodes.iter().enumerate() {
        for dep in &gate.dependencies {
            if let Some(&d) = index.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<(u8, usize)> = nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, g)| (g.priority.rank(), i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        let (_, i) = next;
        order.push(nodes[i].name.clone());
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert((nodes[dependent].priority.rank(), dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        let gates = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, g)| g.name.clone())
            .collect();
        return Err(CoreError::CycleDetected { gates });
    }

    Ok(order)
}

/// BFS layering: a gate's layer is one past the deepest layer among its
/// dependencies (0 without dependencies).
fn parallel_layers(nodes: &[&Gate]) -> CoreResult<Vec<Vec<String>>> {
    let order = topological_order(nodes)?;
    let by_name: HashMap<&str, (usize, &Gate)> = nodes
        .iter()
        .enumerate()
        .map(|(i, g)| (g.name.as_str(), (i, *g)))
        .collect();

    let mut level: HashMap<&str, usize> = HashMap::new();
    let mut layers: Vec<Vec<(u8, usize, String)>> = Vec::new();
    for name in &order {
        let Some(&(idx, gate)) = by_name.get(name.as_str()) else {
            continue;
        };
        let depth = gate
            .dependencies
            .iter()
            .filter_map(|dep| level.get(dep.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level.insert(gate.name.as_str(), depth);
        if layers.len() <= depth {
            layers.resize_with(depth + 1, Vec::new);
        }
        layers[depth].push((gate.priority.rank(), idx, gate.name.clone()));
    }

    Ok(layers
        .into_iter()
        .map(|mut layer| {
            layer.sort();
            layer.into_iter().map(|(_, _, name)| name).collect()
        })
        .collect())
}

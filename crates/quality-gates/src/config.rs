//! Pipeline Configuration
//!
//! The enumerated option surface of the pipeline: which gates are enabled,
//! per-gate overrides, the default timeout, cache sizing and concurrency.
//!
//! Configuration is plain data. It can be built in code, deserialized from
//! JSON, or parsed from a TOML string; applying it to a registry is an
//! explicit step.
//!
//! ```toml
//! enabledGates = ["syntax", "lint"]
//! defaultTimeoutMs = 30000
//! maxConcurrency = 4
//! executionMode = "parallel"
//!
//! [cache]
//! ttlMs = 300000
//! maxEntries = 1000
//!
//! [gates.lint]
//! priority = "high"
//! timeoutMs = 5000
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use gatework_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::models::{DependencyPolicy, ExecutionMode, GatePriority};
use crate::planner::PlannerConfig;
use crate::registry::GateRegistry;

/// Per-gate override. Unset fields leave the registered value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<GatePriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// When set, exactly these gates are enabled and all others disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_gates: Option<Vec<String>>,
    /// Per-gate overrides, keyed by gate name
    #[serde(default)]
    pub gates: BTreeMap<String, GateOverride>,
    /// Timeout for gates that do not declare one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub dependency_policy: DependencyPolicy,
    #[serde(default)]
    pub stop_on_critical_failure: bool,
    /// Reported load in `[0, 1]` at which concurrency is halved
    #[serde(default = "default_high_load_threshold")]
    pub high_load_threshold: f64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_high_load_threshold() -> f64 {
    0.8
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled_gates: None,
            gates: BTreeMap::new(),
            default_timeout_ms: default_timeout_ms(),
            cache: CacheConfig::default(),
            max_concurrency: default_max_concurrency(),
            execution_mode: ExecutionMode::default(),
            dependency_policy: DependencyPolicy::default(),
            stop_on_critical_failure: false,
            high_load_threshold: default_high_load_threshold(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| CoreError::parse(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> CoreResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(CoreError::config("defaultTimeoutMs must be greater than 0"));
        }
        if self.max_concurrency == 0 {
            return Err(CoreError::config("maxConcurrency must be at least 1"));
        }
        if self.cache.max_entries == 0 {
            return Err(CoreError::config("cache.maxEntries must be at least 1"));
        }
        if self.cache.ttl_ms == 0 {
            return Err(CoreError::config("cache.ttlMs must be greater than 0"));
        }
        if self.cache.sweep_interval_ms == 0 {
            return Err(CoreError::config("cache.sweepIntervalMs must be greater than 0"));
        }
        if !(self.high_load_threshold > 0.0 && self.high_load_threshold <= 1.0) {
            return Err(CoreError::config(format!(
                "highLoadThreshold must be within (0, 1], got {}",
                self.high_load_threshold
            )));
        }
        for (name, gate) in &self.gates {
            if gate.timeout_ms == Some(0) {
                return Err(CoreError::config(format!(
                    "gates.{name}.timeoutMs must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Default gate timeout as a `Duration`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Apply gate selection and overrides to a registry.
    ///
    /// Every name must refer to a registered gate. All names are checked
    /// before anything is changed.
    pub fn apply(&self, registry: &mut GateRegistry) -> CoreResult<()> {
        let listed = self.enabled_gates.iter().flatten();
        for name in listed.chain(self.gates.keys()) {
            if !registry.contains(name) {
                return Err(CoreError::config(format!(
                    "configuration references unknown gate '{name}'"
                )));
            }
        }

        if let Some(enabled) = &self.enabled_gates {
            for name in registry.names() {
                registry.set_enabled(&name, enabled.contains(&name))?;
            }
        }

        for (name, gate) in &self.gates {
            if let Some(enabled) = gate.enabled {
                registry.set_enabled(name, enabled)?;
            }
            if let Some(priority) = gate.priority {
                registry.set_priority(name, priority)?;
            }
            if let Some(ms) = gate.timeout_ms {
                registry.set_timeout(name, Duration::from_millis(ms))?;
            }
        }
        Ok(())
    }

    /// Planner settings derived from this configuration.
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            max_concurrency: self.max_concurrency,
            high_load_threshold: self.high_load_threshold,
            execution_mode: self.execution_mode,
            dependency_policy: self.dependency_policy,
            stop_on_critical_failure: self.stop_on_critical_failure,
            default_timeout: self.default_timeout(),
            ..PlannerConfig::default()
        }
    }
}

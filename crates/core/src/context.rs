//! Validation Context
//!
//! Request-scoped, read-only inputs to a validation run:
//!
//! 1. `ValidationContext` - what to validate (target, scope, gate subset,
//!    requirements, constraints), created once per request
//! 2. `GateContext` - the per-gate view handed to a validator: the shared
//!    request context plus the gate's own identity and configuration
//!
//! Validators receive a `GateContext` and cannot mutate the request. The
//! request context is shared behind an `Arc`, so fanning it out to concurrent
//! gate tasks never copies the file list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validator::GateType;

// ============================================================================
// Target
// ============================================================================

/// Kind of artifact a validation request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A single file
    File,
    /// A directory tree
    Directory,
    /// A whole project
    Project,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::File => "file",
            TargetKind::Directory => "directory",
            TargetKind::Project => "project",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of the artifact under validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Target kind
    #[serde(rename = "type")]
    pub kind: TargetKind,
    /// Location of the target
    pub uri: String,
    /// Files included in the validation
    #[serde(default)]
    pub files: Vec<String>,
    /// Glob-style patterns excluded from validation
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Target {
    /// Create a target without explicit files or exclusions.
    pub fn new(kind: TargetKind, uri: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.into(),
            files: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Set the file list
    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Set the exclusion patterns
    pub fn with_excludes(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Stable identity string of this target.
    ///
    /// File and exclusion lists are sorted so that two requests naming the
    /// same files in a different order share cache entries. Every field is
    /// length-prefixed, so separators inside paths cannot make two distinct
    /// targets encode the same way.
    pub fn identity(&self) -> String {
        let mut files: Vec<&str> = self.files.iter().map(String::as_str).collect();
        files.sort_unstable();
        let mut excludes: Vec<&str> = self.exclude_patterns.iter().map(String::as_str).collect();
        excludes.sort_unstable();

        let mut out = String::new();
        push_field(&mut out, self.kind.as_str());
        push_field(&mut out, &self.uri);
        push_list(&mut out, &files);
        push_list(&mut out, &excludes);
        out
    }
}

fn push_field(out: &mut String, value: &str) {
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
}

fn push_list(out: &mut String, items: &[&str]) {
    out.push('[');
    out.push_str(&items.len().to_string());
    for item in items {
        out.push(' ');
        push_field(out, item);
    }
    out.push(']');
}

// ============================================================================
// Scope / Constraints
// ============================================================================

/// How deep the validation should look.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Depth label (e.g. "shallow", "standard", "deep")
    #[serde(default)]
    pub depth: Option<String>,
}

/// Execution limits attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    /// Overall time budget for the whole request, in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Upper bound on concurrently running gates for this request
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Reported system load in `[0, 1]`
    #[serde(default)]
    pub system_load: Option<f64>,
}

// ============================================================================
// ValidationContext
// ============================================================================

/// A single validation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    /// Artifact under validation
    pub target: Target,
    /// Validation scope
    #[serde(default)]
    pub scope: Scope,
    /// Requested gate types; `None` selects every enabled gate
    #[serde(default)]
    pub gates: Option<Vec<GateType>>,
    /// Free-form requirements forwarded to validators
    #[serde(default)]
    pub requirements: Map<String, Value>,
    /// Execution limits
    #[serde(default)]
    pub constraints: Constraints,
}

impl ValidationContext {
    /// Create a request for a target with default scope and constraints.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            scope: Scope::default(),
            gates: None,
            requirements: Map::new(),
            constraints: Constraints::default(),
        }
    }

    /// Restrict the request to the given gate types.
    pub fn with_gates(mut self, gates: Vec<GateType>) -> Self {
        self.gates = Some(gates);
        self
    }

    /// Set the scope depth
    pub fn with_depth(mut self, depth: impl Into<String>) -> Self {
        self.scope.depth = Some(depth.into());
        self
    }

    /// Add a requirement entry
    pub fn with_requirement(mut self, key: impl Into<String>, value: Value) -> Self {
        self.requirements.insert(key.into(), value);
        self
    }

    /// Set the constraints
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Whether a gate of the given type was requested.
    pub fn requests(&self, gate_type: GateType) -> bool {
        match &self.gates {
            Some(types) => types.contains(&gate_type),
            None => true,
        }
    }
}

// ============================================================================
// GateContext
// ============================================================================

/// Per-gate view of a request, handed to a validator.
#[derive(Debug, Clone)]
pub struct GateContext {
    request: Arc<ValidationContext>,
    gate_name: String,
    gate_type: GateType,
    configuration: Value,
}

impl GateContext {
    /// Create a new GateContext.
    pub fn new(
        request: Arc<ValidationContext>,
        gate_name: impl Into<String>,
        gate_type: GateType,
        configuration: Value,
    ) -> Self {
        Self {
            request,
            gate_name: gate_name.into(),
            gate_type,
            configuration,
        }
    }

    /// The shared request context.
    pub fn request(&self) -> &ValidationContext {
        &self.request
    }

    /// Target under validation.
    pub fn target(&self) -> &Target {
        &self.request.target
    }

    /// Name of the gate being executed.
    pub fn gate_name(&self) -> &str {
        &self.gate_name
    }

    /// Type tag of the gate being executed.
    pub fn gate_type(&self) -> GateType {
        self.gate_type
    }

    /// The gate's configuration object.
    pub fn configuration(&self) -> &Value {
        &self.configuration
    }

    /// Look up a single configuration value.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.configuration.get(key)
    }
}

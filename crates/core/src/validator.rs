//! Validator Contract
//!
//! Defines the seam between the pipeline and the individual check
//! implementations:
//!
//! - `GateType` - type tag used to look a validator up in the registry
//! - `GateValidator` - the capability every check implements
//! - `ValidatorOutput` - what a check returns
//! - `FnValidator` - closure adapter for embedding checks without a new type
//!
//! The pipeline never inspects validator internals. It only relies on this
//! contract and on the validator returning (or failing) within its deadline.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::GateContext;
use crate::error::CoreResult;

// ============================================================================
// Enums
// ============================================================================

/// Kind of quality check a gate performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateType {
    /// Syntax validation
    Syntax,
    /// Type checking
    Type,
    /// Lint rules
    Lint,
    /// Security scanning
    Security,
    /// Test execution
    Test,
    /// Performance analysis
    Performance,
    /// Documentation checks
    Documentation,
    /// Integration checks
    Integration,
}

impl GateType {
    /// All gate types in canonical order.
    pub const ALL: [GateType; 8] = [
        GateType::Syntax,
        GateType::Type,
        GateType::Lint,
        GateType::Security,
        GateType::Test,
        GateType::Performance,
        GateType::Documentation,
        GateType::Integration,
    ];

    /// Lowercase tag
    pub fn as_str(&self) -> &'static str {
        match self {
            GateType::Syntax => "syntax",
            GateType::Type => "type",
            GateType::Lint => "lint",
            GateType::Security => "security",
            GateType::Test => "test",
            GateType::Performance => "performance",
            GateType::Documentation => "documentation",
            GateType::Integration => "integration",
        }
    }
}

impl std::fmt::Display for GateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    /// Gate passed
    Passed,
    /// Gate passed with findings worth attention
    Warning,
    /// Gate failed
    Failed,
    /// Gate did not run
    Skipped,
}

impl GateStatus {
    /// Check if this status indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, GateStatus::Passed | GateStatus::Skipped)
    }

    /// Check if this status indicates failure
    pub fn is_failure(&self) -> bool {
        matches!(self, GateStatus::Failed)
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStatus::Passed => write!(f, "passed"),
            GateStatus::Warning => write!(f, "warning"),
            GateStatus::Failed => write!(f, "failed"),
            GateStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

// ============================================================================
// Issue / ValidatorOutput
// ============================================================================

/// A single finding reported by a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl Issue {
    /// Create an issue without a source location.
    pub fn new(severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
            rule: None,
        }
    }

    /// Attach a source location
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Attach the rule identifier that produced the finding
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

/// Result returned by a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorOutput {
    pub status: GateStatus,
    pub valid: bool,
    /// Score in `[0, 100]`; out-of-range values are clamped by the engine
    pub score: f64,
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub processing_time_ms: u64,
}

impl ValidatorOutput {
    /// A clean pass with the given score.
    pub fn passed(score: f64) -> Self {
        Self {
            status: GateStatus::Passed,
            valid: true,
            score,
            issues: Vec::new(),
            metadata: Map::new(),
            processing_time_ms: 0,
        }
    }

    /// A pass with findings.
    pub fn warning(score: f64, issues: Vec<Issue>) -> Self {
        Self {
            status: GateStatus::Warning,
            valid: true,
            score,
            issues,
            metadata: Map::new(),
            processing_time_ms: 0,
        }
    }

    /// A failed check.
    pub fn failed(score: f64, issues: Vec<Issue>) -> Self {
        Self {
            status: GateStatus::Failed,
            valid: false,
            score,
            issues,
            metadata: Map::new(),
            processing_time_ms: 0,
        }
    }

    /// Set the self-reported processing time
    pub fn with_processing_time(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// GateValidator
// ============================================================================

/// A pluggable quality check.
///
/// Implementations are registered in the gate registry under their
/// `gate_type()` tag; every gate of that type is executed through them.
#[async_trait]
pub trait GateValidator: Send + Sync {
    /// Name of the validator implementation
    fn name(&self) -> &str;

    /// Type tag this validator serves
    fn gate_type(&self) -> GateType;

    /// Disabled validators are treated as missing
    fn is_enabled(&self) -> bool {
        true
    }

    /// Run the check.
    ///
    /// Must return or fail within the gate's declared timeout; the engine
    /// stops waiting once the deadline passes.
    async fn validate(&self, ctx: &GateContext) -> CoreResult<ValidatorOutput>;
}

// ============================================================================
// FnValidator
// ============================================================================

type ValidateFuture = Pin<Box<dyn Future<Output = CoreResult<ValidatorOutput>> + Send>>;
type ValidateFn = Box<dyn Fn(GateContext) -> ValidateFuture + Send + Sync>;

/// Validator backed by an async closure.
pub struct FnValidator {
    name: String,
    gate_type: GateType,
    enabled: bool,
    func: ValidateFn,
}

impl FnValidator {
    /// Wrap a closure as a validator for `gate_type`.
    pub fn new<F, Fut>(name: impl Into<String>, gate_type: GateType, func: F) -> Self
    where
        F: Fn(GateContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<ValidatorOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            gate_type,
            enabled: true,
            func: Box::new(move |ctx| Box::pin(func(ctx))),
        }
    }

    /// Set the enabled flag
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Debug for FnValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnValidator")
            .field("name", &self.name)
            .field("gate_type", &self.gate_type)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[async_trait]
impl GateValidator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate_type(&self) -> GateType {
        self.gate_type
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn validate(&self, ctx: &GateContext) -> CoreResult<ValidatorOutput> {
        (self.func)(ctx.clone()).await
    }
}

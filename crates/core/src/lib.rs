//! Gatework Core
//!
//! Foundational types shared by the Gatework workspace. This crate has no
//! dependency on the scheduler, cache or any concrete check.
//!
//! ## Module Organization
//!
//! - `error` - Core error type (`CoreError`, `CoreResult`) and transient-error classification
//! - `context` - Request context (`ValidationContext`, `Target`, `Constraints`) and the per-gate `GateContext`
//! - `validator` - Validator contract (`GateValidator`, `ValidatorOutput`, `FnValidator`) and its tags

pub mod context;
pub mod error;
pub mod validator;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Request Context ────────────────────────────────────────────────────
pub use context::{Constraints, GateContext, Scope, Target, TargetKind, ValidationContext};

// ── Validator Contract ─────────────────────────────────────────────────
pub use validator::{
    FnValidator, GateStatus, GateType, GateValidator, Issue, IssueSeverity, ValidatorOutput,
};

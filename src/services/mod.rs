//! Services
//!
//! Entry points that wire the pipeline components together.

pub mod validation;

pub use validation::{QualityGateService, ValidationReport};

//! Integration Tests Module
//!
//! End-to-end tests of the validation pipeline through `QualityGateService`,
//! plus the result cache used on its own.

// Planning, execution and aggregation through the service facade
mod pipeline_test;

// Result cache TTL, LRU and statistics
mod cache_test;

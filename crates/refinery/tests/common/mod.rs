//! Shared utilities for refinery integration tests.

pub mod harness;

pub use harness::{assert_audit_iff_completed, TestHarness, STANDARD_AUDIT};

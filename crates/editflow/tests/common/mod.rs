//! Shared test utilities for editflow integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an in-memory store, queue and object store together
//! - Scripted adapters and a recording progress reporter

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;

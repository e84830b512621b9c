//! Shared test utilities for scansync integration tests.
//!
//! This module provides:
//! - `TestHarness` running every stage against an in-memory broker
//! - Fake OCR, naming and remote storage backends
//! - Writers for small PDF and PNG fixtures

pub mod fakes;
pub mod fixtures;
pub mod harness;

pub use fakes::*;
pub use fixtures::*;
pub use harness::TestHarness;

//! Shared test utilities for vidscribe integration tests.
//!
//! This module provides:
//! - `ScriptedBackend`, a transcription backend that plays back a script of outcomes
//! - `ConfigBuilder` for engine configs tuned for fast tests
//! - `TestHarness` owning a runtime, a repository and a running service
//! - `GatedRepository` for pausing a save at a chosen point

pub mod backend;
pub mod builders;
pub mod harness;
pub mod repository;

pub use backend::{ScriptedBackend, Step};
pub use builders::*;
pub use harness::TestHarness;
pub use repository::GatedRepository;

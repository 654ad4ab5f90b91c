//! Build pipeline adapter.
//!
//! A [`Recipe`] is an immutable, append-only list of container-build
//! operations. Building one is pure value composition; only the terminal calls
//! of an [`Engine`] force evaluation.
//!
//! # Submodules
//!
//! - [`engine`] - The `Engine` trait and `PipelineError`
//! - [`docker`] - Engine backed by `docker buildx build`
//! - [`host`] - Host filesystem helpers shared by engines
//! - `scripted` - In-memory engine for tests (feature `test-support`)

pub mod docker;
pub mod engine;
pub mod host;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
mod types;

pub use engine::{Engine, PipelineError};
pub use types::*;

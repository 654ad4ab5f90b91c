//! The engine seam: the only place a recipe is ever evaluated.

use std::future::Future;
use std::path::Path;

use thiserror::Error;

use super::{Recipe, Source};

/// Errors produced while forcing a recipe.
#[derive(Debug, Error)]
pub enum PipelineError {
  /// The last exec step exited non-zero and was not marked tolerant.
  #[error("process exited with code {code}: {stderr}")]
  ExecutionFailed { code: i32, stderr: String },

  /// The surrounding caller gave up on the operation.
  #[error("operation cancelled")]
  Cancelled,

  /// The recipe cannot answer the requested terminal call.
  #[error("invalid recipe: {0}")]
  InvalidRecipe(String),

  /// The engine itself failed, independently of the recipe's processes.
  #[error("engine failed with status {status:?}: {message}")]
  EngineFailed { status: Option<i32>, message: String },

  /// A path requested from a directory source does not exist.
  #[error("path not found: {path}")]
  NotFound { path: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to serialize recipe: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// An external container-build engine.
///
/// Building a [`Recipe`] never touches the engine; these calls are the only
/// suspension points. Forcing a recipe whose last exec step exited non-zero
/// fails with [`PipelineError::ExecutionFailed`] unless that step was built
/// with [`Recipe::with_exec_any_exit`].
pub trait Engine: Send + Sync {
  /// Exit code of the recipe's last exec step.
  fn exit_code(&self, recipe: &Recipe) -> impl Future<Output = Result<i32, PipelineError>> + Send;

  /// Captured standard output of the recipe's last exec step.
  fn stdout(&self, recipe: &Recipe) -> impl Future<Output = Result<String, PipelineError>> + Send;

  /// Materialise a directory source on the host at `dest`.
  fn export_directory(&self, source: &Source, dest: &Path) -> impl Future<Output = Result<(), PipelineError>> + Send;

  /// Entries directly under `path` of a directory source. Directories carry a
  /// trailing `/`.
  fn entries(&self, source: &Source, path: &str) -> impl Future<Output = Result<Vec<String>, PipelineError>> + Send;

  /// Contents of the file at `path` of a directory source.
  fn contents(&self, source: &Source, path: &str) -> impl Future<Output = Result<String, PipelineError>> + Send;
}

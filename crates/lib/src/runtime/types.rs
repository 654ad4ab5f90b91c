use thiserror::Error;

use crate::pipeline::PipelineError;

/// Where the compiler should be pointed, relative to the module subpath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTarget {
  /// The project file sits directly in the subpath.
  SameFolder,
  /// The project file sits in a subfolder named after the module.
  SubFolder,
}

impl CompileTarget {
  /// The argument passed to the compiler.
  pub fn argument(self, module_name: &str) -> &str {
    match self {
      CompileTarget::SameFolder => ".",
      CompileTarget::SubFolder => module_name,
    }
  }
}

/// Errors that end a priming run.
#[derive(Debug, Error)]
pub enum RuntimeError {
  /// The probe exited with a code outside the discovery contract, or the
  /// post-compile re-probe failed.
  #[error("discovery probe for module {module} in {subpath} exited with unrecognised code {code}\n{output}")]
  DiscoveryProtocolViolation {
    module: String,
    subpath: String,
    code: i32,
    output: String,
  },

  #[error(
    "no project found for module {module} in {subpath}: expected a project file there or in a {module}/ subfolder"
  )]
  ProjectNotFound { subpath: String, module: String },

  #[error("compiling module {module} in {subpath} failed with code {code}\n{output}")]
  CompileFailed {
    module: String,
    subpath: String,
    code: i32,
    output: String,
  },

  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

impl RuntimeError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, RuntimeError::Pipeline(PipelineError::Cancelled))
  }
}

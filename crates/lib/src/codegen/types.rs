use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::pipeline::{Engine, PipelineError, Source};

#[derive(Debug, Error)]
pub enum CodegenError {
  /// A template file shipped with the runtime is missing or unreadable.
  #[error("template unavailable at {}: {source}", path.display())]
  TemplateUnavailable { path: PathBuf, source: io::Error },

  #[error(transparent)]
  Pipeline(#[from] PipelineError),

  #[error("failed to write {}: {source}", path.display())]
  Write { path: PathBuf, source: io::Error },
}

/// What already exists where the module lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectDescriptor {
  /// A built assembly is present; no project file is touched.
  HasCompiledAssembly,
  /// A project file exists in this directory, relative to the module
  /// subpath (empty for the subpath itself).
  HasProjectFileAtPath(String),
  /// A module-named subfolder holds a solution but no project file.
  HasNamedSubfolderWithSolution,
  Absent,
}

/// The result of code generation, relative to the context root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenArtifact {
  /// Generated client sources. Depends only on the introspection input.
  pub generated: Source,
  /// Where `generated` is placed.
  pub generated_dir: String,
  /// Project and support files written over the generated tree, by path.
  pub files: BTreeMap<String, String>,
  /// Globs to keep out of version control.
  pub vcs_ignored: Vec<String>,
  pub descriptor: ProjectDescriptor,
}

impl CodegenArtifact {
  /// Write the artifact under `dest`.
  pub async fn materialize<E: Engine>(&self, engine: &E, dest: &Path) -> Result<(), CodegenError> {
    let generated_dir = dest.join(&self.generated_dir);
    engine.export_directory(&self.generated, &generated_dir).await?;

    for (rel, contents) in &self.files {
      let path = dest.join(rel);
      debug!(path = %path.display(), "writing project file");
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CodegenError::Write {
          path: parent.to_path_buf(),
          source: e,
        })?;
      }
      std::fs::write(&path, contents).map_err(|e| CodegenError::Write { path, source: e })?;
    }
    Ok(())
  }
}

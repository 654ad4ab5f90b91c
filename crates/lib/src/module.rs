use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::{Source, join_subpath};

/// The caller's description of a module to prime.
///
/// Resolved once by the caller and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleSource {
  /// Host directory holding the module (and possibly much more).
  pub context_directory: PathBuf,
  /// Module location relative to `context_directory`. Empty or `.` for the
  /// context root.
  pub source_subpath: String,
  pub module_name: String,
}

impl ModuleSource {
  pub fn new(context_directory: impl Into<PathBuf>, source_subpath: &str, module_name: &str) -> Self {
    Self {
      context_directory: context_directory.into(),
      source_subpath: normalize_subpath(source_subpath),
      module_name: module_name.to_string(),
    }
  }

  /// The context directory as a recipe source.
  pub fn context(&self) -> Source {
    Source::host(&self.context_directory)
  }

  /// Subpath as a relative path for directory listings (`.` for the root).
  pub fn subpath(&self) -> &str {
    if self.source_subpath.is_empty() {
      "."
    } else {
      &self.source_subpath
    }
  }

  /// Where the module source appears once the context is mounted at `mount`.
  pub fn mounted_at(&self, mount: &str) -> String {
    join_subpath(mount, &self.source_subpath)
  }

  pub fn host_path(&self) -> PathBuf {
    if self.source_subpath.is_empty() {
      self.context_directory.clone()
    } else {
      self.context_directory.join(Path::new(&self.source_subpath))
    }
  }
}

fn normalize_subpath(subpath: &str) -> String {
  let trimmed = subpath.trim_matches('/');
  if trimmed == "." {
    String::new()
  } else {
    trimmed.trim_start_matches("./").to_string()
  }
}

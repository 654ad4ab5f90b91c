use std::fs;
use std::path::Path;

use tracing::debug;

use super::patch::patch_version_pin;
use super::types::CodegenError;
use crate::config::RuntimeConfig;
use crate::platform::paths::templates_dir;

/// Project file template shipped with the binary.
pub const PROJECT_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/Template.csproj"));

/// Support source shipped with the binary.
pub const SUPPORT_SOURCE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/Module.cs"));

/// The project file and support source injected into modules that have
/// neither a project nor an assembly yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTemplate {
  pub project: String,
  pub support: String,
}

impl ProjectTemplate {
  pub fn builtin() -> Self {
    Self {
      project: PROJECT_TEMPLATE.to_string(),
      support: SUPPORT_SOURCE.to_string(),
    }
  }

  /// The templates in effect for `config`: the configured directory, else
  /// the per-user templates directory if it holds a project template, else
  /// the built-in pair.
  pub fn resolve(config: &RuntimeConfig) -> Result<Self, CodegenError> {
    if let Some(dir) = &config.codegen.templates_dir {
      return Self::load(dir, config);
    }

    let user = templates_dir();
    if user.join(&config.codegen.project_template).is_file() {
      debug!(dir = %user.display(), "using user templates");
      return Self::load(&user, config);
    }
    Ok(Self::builtin())
  }

  /// Load both template files from `dir`.
  pub fn load(dir: &Path, config: &RuntimeConfig) -> Result<Self, CodegenError> {
    let read = |name: &str| {
      let path = dir.join(name);
      fs::read_to_string(&path).map_err(|e| CodegenError::TemplateUnavailable { path, source: e })
    };

    Ok(Self {
      project: read(&config.codegen.project_template)?,
      support: read(&config.codegen.support_file)?,
    })
  }

  /// The project file for `module_name`, pinned to the release version.
  pub fn render_project(&self, module_name: &str, config: &RuntimeConfig) -> String {
    let named = self.project.replace(&config.codegen.placeholder, module_name);
    patch_version_pin(&named, &config.codegen.version_marker, &config.release_version).into_owned()
  }
}

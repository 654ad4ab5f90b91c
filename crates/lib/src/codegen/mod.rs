//! Client code generation.
//!
//! The generator recipe is keyed only on configuration and the introspection
//! document, so modules with identical introspection share one generated
//! tree. Module identity only decides which project file, if any, is laid
//! over it:
//!
//! | descriptor                       | project files                      |
//! |----------------------------------|------------------------------------|
//! | `Absent`                         | template project + support source  |
//! | `HasProjectFileAtPath(p)`        | existing project, version re-pinned|
//! | `HasCompiledAssembly`            | none                               |
//! | `HasNamedSubfolderWithSolution`  | none                               |

pub mod descriptor;
pub mod patch;
pub mod template;
mod types;

pub use descriptor::scan_descriptor;
pub use patch::patch_version_pin;
pub use template::ProjectTemplate;
pub use types::*;

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::module::ModuleSource;
use crate::pipeline::{Engine, MountOpts, PipelineError, Recipe, Source};
use crate::runtime::runtime_base;

/// Debug symbols and build output directories, never versioned.
pub const BUILD_BYPRODUCTS: [&str; 3] = ["**/*.pdb", "bin", "obj"];

/// The recipe that runs the generator over `introspection`. Its working
/// directory holds the generated sources.
pub fn generator_recipe(config: &RuntimeConfig, introspection: &str) -> Recipe {
  let env = &config.env;
  let paths = &config.paths;

  runtime_base(config)
    .with_mount("/", Source::image(&config.probe_image()), MountOpts::default())
    .with_mount("/", Source::image(&config.generator_image()), MountOpts::default())
    .with_env(&env.source_path, &paths.generator)
    .with_env(&env.internal, "")
    .with_exec(&config.commands.probe)
    .without_env(&env.internal)
    .without_env(&env.source_path)
    .with_mount(&paths.introspection, Source::new_file(introspection), MountOpts::default())
    .with_exec(&config.commands.generator)
}

/// Generate the client for `module` from `introspection`.
pub async fn codegen<E: Engine>(
  engine: &E,
  config: &RuntimeConfig,
  module: &ModuleSource,
  introspection: &str,
) -> Result<CodegenArtifact, CodegenError> {
  let name = &module.module_name;
  let base = module.source_subpath.as_str();
  let generated = generator_recipe(config, introspection).directory(".");

  let context = module.context();
  let descriptor = scan_descriptor(engine, &context, module.subpath(), name, &config.layout).await?;
  info!(module = %name, descriptor = ?descriptor, "classified module directory");

  let generated_dir = if config.codegen.split_layout {
    rel_join(base, &config.codegen.libraries_dir)
  } else {
    base.to_string()
  };

  let mut files = BTreeMap::new();
  match &descriptor {
    ProjectDescriptor::Absent => {
      let template = ProjectTemplate::resolve(config)?;
      files.insert(
        rel_join(base, &config.layout.project_file(name)),
        template.render_project(name, config),
      );
      files.insert(rel_join(base, &config.codegen.support_file), template.support);
    }
    ProjectDescriptor::HasProjectFileAtPath(dir) => {
      let project = rel_join(&rel_join(base, dir), &config.layout.project_file(name));
      match engine.contents(&context, &project).await {
        Ok(contents) => {
          let patched = patch_version_pin(&contents, &config.codegen.version_marker, &config.release_version);
          files.insert(project, patched.into_owned());
        }
        Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled.into()),
        Err(e) => warn!(path = %project, error = %e, "could not read project file, leaving it as is"),
      }
    }
    ProjectDescriptor::HasCompiledAssembly | ProjectDescriptor::HasNamedSubfolderWithSolution => {}
  }

  Ok(CodegenArtifact {
    generated,
    generated_dir,
    files,
    vcs_ignored: vcs_ignored(&config.codegen.vcs_ignored),
    descriptor,
  })
}

fn vcs_ignored(extra: &[String]) -> Vec<String> {
  let mut globs: Vec<String> = BUILD_BYPRODUCTS.iter().map(|g| g.to_string()).collect();
  for glob in extra {
    if !globs.contains(glob) {
      globs.push(glob.clone());
    }
  }
  globs
}

/// Join relative paths, treating an empty prefix as the root.
fn rel_join(base: &str, rest: &str) -> String {
  match (base.is_empty(), rest.is_empty()) {
    (true, _) => rest.to_string(),
    (false, true) => base.to_string(),
    (false, false) => format!("{}/{}", base.trim_end_matches('/'), rest),
  }
}

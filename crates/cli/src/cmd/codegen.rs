//! Implementation of the `modprime codegen` command.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use modprime_lib::codegen::{CodegenError, ProjectDescriptor, codegen};
use modprime_lib::config::RuntimeConfig;
use modprime_lib::module::ModuleSource;
use modprime_lib::pipeline::docker::DockerEngine;

use super::run_cancellable;
use crate::output::{print_info, print_stat, print_success, print_warning};

pub fn cmd_codegen(config: &RuntimeConfig, module: &ModuleSource, introspection: &Path, out: &Path) -> Result<()> {
  let document = fs::read_to_string(introspection)
    .with_context(|| format!("Failed to read introspection document {}", introspection.display()))?;
  let engine = DockerEngine::new(config.docker.clone());

  let artifact = run_cancellable(async {
    let artifact = codegen(&engine, config, module, &document).await?;
    artifact.materialize(&engine, out).await?;
    Ok::<_, CodegenError>(artifact)
  })
  .with_context(|| format!("Failed to generate client for module {}", module.module_name))?;

  print_success(&format!("Generated client for {}", module.module_name));
  print_stat("Sources", &out.join(&artifact.generated_dir).display().to_string());
  for file in artifact.files.keys() {
    print_info(&format!("wrote {}", file));
  }
  if artifact.descriptor == ProjectDescriptor::HasNamedSubfolderWithSolution {
    print_warning("Module folder holds a solution without a project file; no project was written");
  }
  if !artifact.vcs_ignored.is_empty() {
    print_stat("Keep out of version control", &artifact.vcs_ignored.join(", "));
  }

  Ok(())
}

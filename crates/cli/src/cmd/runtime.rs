//! Implementation of the `modprime runtime` command.

use anyhow::{Context, Result};
use tracing::info;

use modprime_lib::config::RuntimeConfig;
use modprime_lib::module::ModuleSource;
use modprime_lib::pipeline::{Op, PipelineError};
use modprime_lib::pipeline::docker::DockerEngine;
use modprime_lib::runtime::{RuntimeError, module_runtime};
use modprime_lib::util::hash::Hashable;

use super::run_cancellable;
use crate::output::{print_json, print_stat, print_success, print_warning, symbols, truncate_hash};

/// Prime `module` with the Docker engine and describe the resulting recipe.
pub fn cmd_runtime(config: &RuntimeConfig, module: &ModuleSource, verbose: bool, json: bool) -> Result<()> {
  let engine = DockerEngine::new(config.docker.clone());
  let recipe = match run_cancellable(module_runtime(&engine, config, module)) {
    Ok(recipe) => recipe,
    Err(e) if is_cancelled(&e) => anyhow::bail!("Priming {} was cancelled", module.module_name),
    Err(e) => return Err(e.context(format!("Failed to prime module {}", module.module_name))),
  };
  let hash = recipe.compute_hash().context("Failed to hash recipe")?;
  info!(module = %module.module_name, hash = %hash, "module primed");

  if json {
    return print_json(&serde_json::json!({
      "module": module.module_name,
      "subpath": module.subpath(),
      "hash": hash.0,
      "recipe": recipe,
    }));
  }

  let entrypoint = recipe.ops().iter().rev().find_map(|op| match op {
    Op::Entrypoint { args } => Some(args),
    _ => None,
  });

  print_success(&format!("Module {} primed", module.module_name));
  print_stat("Recipe", truncate_hash(&hash.0));
  print_stat("Operations", &recipe.ops().len().to_string());
  match entrypoint {
    Some(args) if args.is_empty() => print_warning("Module directory is empty, the entrypoint does nothing"),
    Some(args) => print_stat("Entrypoint", &args.join(" ")),
    None => {}
  }

  if verbose {
    println!();
    for op in recipe.ops() {
      println!("  {} {:?}", symbols::INFO, op);
    }
  }

  Ok(())
}

fn is_cancelled(e: &anyhow::Error) -> bool {
  e.downcast_ref::<RuntimeError>().is_some_and(RuntimeError::is_cancelled)
    || matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::Cancelled))
}

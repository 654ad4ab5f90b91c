//! The priming protocol.
//!
//! Turns a [`ModuleSource`] into a recipe whose entrypoint invokes the
//! module, compiling it first when the probe finds only a project file:
//!
//! ```text
//! bootstrap -> probe -> classify -+-> Ready ------------------------------+-> finalize
//!                                 +-> FoundSameFolder -+-> compile -> re-probe -+
//!                                 +-> FoundSubFolder --+
//!                                 +-> NotFound --> no-op entrypoint | ProjectNotFound
//!                                 +-> OtherFailure --> DiscoveryProtocolViolation
//! ```
//!
//! Every step extends the previous recipe by value. The engine is consulted
//! only for the probe's exit code, the compile output, the re-probe and the
//! directory listing of the `NotFound` branch.

mod types;

pub use types::*;

use tracing::{debug, info, warn};

use crate::cache::{CachePurpose, CacheRegistry};
use crate::config::RuntimeConfig;
use crate::module::ModuleSource;
use crate::pipeline::{Engine, MountOpts, PipelineError, Recipe, Source, join_subpath};
use crate::probe::ProbeOutcome;

/// Run the priming protocol for `module` and return the invocable recipe.
pub async fn module_runtime<E: Engine>(
  engine: &E,
  config: &RuntimeConfig,
  module: &ModuleSource,
) -> Result<Recipe, RuntimeError> {
  let primed = bootstrap(config, module);

  let code = engine.exit_code(&primed).await?;
  let outcome = ProbeOutcome::decode(code, &config.exit_codes);
  info!(
    module = %module.module_name,
    subpath = %module.subpath(),
    code,
    outcome = %outcome,
    "probe finished"
  );

  let target = match outcome {
    ProbeOutcome::Ready => return Ok(finalize(config, &primed)),
    ProbeOutcome::NotFound => return not_found(engine, module, &primed).await,
    ProbeOutcome::OtherFailure(code) => {
      let output = engine.stdout(&primed).await?;
      return Err(violation(module, code, output));
    }
    ProbeOutcome::FoundSameFolder => CompileTarget::SameFolder,
    ProbeOutcome::FoundSubFolder => CompileTarget::SubFolder,
  };

  let compiled = compile(engine, config, module, target).await?;
  let reprobed = reprobe(engine, config, module, &primed, compiled).await?;
  Ok(finalize(config, &reprobed))
}

/// Runtime base shared by primed and generator recipes: slim runtime image,
/// download caches and a scratch working directory owned by the module user.
pub fn runtime_base(config: &RuntimeConfig) -> Recipe {
  let registry = CacheRegistry::new(config);
  let paths = &config.paths;

  let mut recipe = Recipe::from_image(&config.images.runtime);
  for (key, value) in &config.base_env {
    recipe = recipe.with_env(key, value);
  }
  let recipe = recipe.with_mount(&paths.tmp, Source::Scratch, MountOpts::default());
  let recipe = registry.mount(&recipe, CachePurpose::HttpDownloads);
  let recipe = registry.mount(&recipe, CachePurpose::Packages);

  recipe
    .with_workdir(&paths.workdir)
    .with_mount(".", Source::Scratch, MountOpts::owned_by(&config.uid))
}

/// Runtime base with the probe and invoker installed and the invoker's own
/// dependencies restored. Depends only on configuration, so it is shared by
/// every module.
pub fn components(config: &RuntimeConfig) -> Recipe {
  let env = &config.env;

  runtime_base(config)
    .with_mount("/", Source::image(&config.probe_image()), MountOpts::default())
    .with_mount("/", Source::image(&config.invoker_image()), MountOpts::default())
    .with_env(&env.source_path, &config.paths.invoker)
    .with_env(&env.internal, "")
    .with_exec(&config.commands.probe)
    .without_env(&env.internal)
}

/// The ready-to-probe recipe: discovery variables set, caller context
/// mounted, probe run with any exit tolerated.
pub fn bootstrap(config: &RuntimeConfig, module: &ModuleSource) -> Recipe {
  let env = &config.env;
  let paths = &config.paths;

  let recipe = components(config)
    .with_env(&env.module_name, &module.module_name)
    .with_env(&env.source_path, &module.mounted_at(&paths.module));
  let recipe = with_client(config, &recipe);

  recipe
    .with_mount(&paths.module, module.context(), MountOpts::owned_by(&config.uid))
    .with_exec_any_exit(&config.commands.probe)
}

/// The SDK recipe that compiles `module`. Its working tree, including build
/// output, is the directory at `paths.workdir`.
pub fn compile_recipe(config: &RuntimeConfig, module: &ModuleSource, target: CompileTarget) -> Recipe {
  let registry = CacheRegistry::new(config);
  let paths = &config.paths;

  let mut recipe = Recipe::from_image(&config.images.sdk);
  for (key, value) in &config.base_env {
    recipe = recipe.with_env(key, value);
  }
  recipe = registry.mount(&recipe, CachePurpose::CompilerHome);
  for setup in &config.compiler.setup {
    recipe = recipe.with_exec(setup);
  }
  recipe = registry.mount(&recipe, CachePurpose::HttpDownloads);
  recipe = registry.mount(&recipe, CachePurpose::Packages);
  recipe = with_client(config, &recipe.with_user(&config.uid));

  let mut command = config.compiler.command.clone();
  command.push(target.argument(&module.module_name).to_string());
  command.extend(config.compiler.flags.iter().cloned());

  recipe
    .with_mount(&paths.workdir, module.context(), MountOpts::owned_by(&config.uid))
    .with_workdir(&join_subpath(&paths.workdir, &module.source_subpath))
    .with_exec(&command)
}

/// Set the invoker as entrypoint.
pub fn finalize(config: &RuntimeConfig, primed: &Recipe) -> Recipe {
  primed.with_entrypoint(&config.commands.invoker)
}

fn with_client(config: &RuntimeConfig, recipe: &Recipe) -> Recipe {
  match &config.images.client {
    Some(image) => recipe.with_mount("/", Source::image(image), MountOpts::default()),
    None => recipe.clone(),
  }
}

async fn not_found<E: Engine>(engine: &E, module: &ModuleSource, primed: &Recipe) -> Result<Recipe, RuntimeError> {
  let entries = match engine.entries(&module.context(), module.subpath()).await {
    Ok(entries) => entries,
    Err(PipelineError::NotFound { path }) => {
      debug!(path = %path, "module directory does not exist yet");
      Vec::new()
    }
    Err(e) => return Err(e.into()),
  };

  if entries.is_empty() {
    info!(module = %module.module_name, "module directory is empty, nothing to invoke");
    let none: [&str; 0] = [];
    return Ok(primed.with_entrypoint(&none));
  }

  Err(RuntimeError::ProjectNotFound {
    subpath: module.subpath().to_string(),
    module: module.module_name.clone(),
  })
}

async fn compile<E: Engine>(
  engine: &E,
  config: &RuntimeConfig,
  module: &ModuleSource,
  target: CompileTarget,
) -> Result<Source, RuntimeError> {
  let recipe = compile_recipe(config, module, target);
  info!(
    module = %module.module_name,
    target = %target.argument(&module.module_name),
    "compiling module"
  );

  match engine.stdout(&recipe).await {
    Ok(output) => {
      debug!(output = %output, "compiler output");
      Ok(recipe.directory(&config.paths.workdir))
    }
    Err(PipelineError::ExecutionFailed { code, stderr }) => {
      warn!(module = %module.module_name, code, "compile failed");
      Err(RuntimeError::CompileFailed {
        module: module.module_name.clone(),
        subpath: module.subpath().to_string(),
        code,
        output: stderr,
      })
    }
    Err(e) => Err(e.into()),
  }
}

/// Mount the compiled tree over the module and probe again. The second probe
/// must succeed outright: it both validates the build and records the
/// module's dependencies.
async fn reprobe<E: Engine>(
  engine: &E,
  config: &RuntimeConfig,
  module: &ModuleSource,
  primed: &Recipe,
  compiled: Source,
) -> Result<Recipe, RuntimeError> {
  let recipe = primed
    .with_mount(&config.paths.module, compiled, MountOpts::owned_by(&config.uid))
    .with_exec(&config.commands.probe);

  match engine.exit_code(&recipe).await {
    Ok(0) => Ok(recipe),
    Ok(code) => {
      let output = engine.stdout(&recipe).await.unwrap_or_default();
      Err(violation(module, code, output))
    }
    Err(PipelineError::ExecutionFailed { code, stderr }) => Err(violation(module, code, stderr)),
    Err(e) => Err(e.into()),
  }
}

fn violation(module: &ModuleSource, code: i32, output: String) -> RuntimeError {
  RuntimeError::DiscoveryProtocolViolation {
    module: module.module_name.clone(),
    subpath: module.subpath().to_string(),
    code,
    output,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipeline::Op;

  fn module() -> ModuleSource {
    ModuleSource::new("/ctx", "dotnet/foo", "Foo")
  }

  #[test]
  fn bootstrap_ends_with_tolerant_probe() {
    let config = RuntimeConfig::default();
    let recipe = bootstrap(&config, &module());

    let (args, tolerant) = recipe.last_exec().unwrap();
    assert_eq!(args, config.commands.probe.as_slice());
    assert!(tolerant);
  }

  #[test]
  fn bootstrap_sets_discovery_env() {
    let config = RuntimeConfig::default();
    let env = bootstrap(&config, &module()).env();

    assert_eq!(env.get("ModuleName").map(String::as_str), Some("Foo"));
    assert_eq!(
      env.get("ModuleSourcePath").map(String::as_str),
      Some("/Module/dotnet/foo")
    );
    assert!(!env.contains_key("ModuleInternalBuild"));
    assert_eq!(env.get("DOTNET_CLI_TELEMETRY_OPTOUT").map(String::as_str), Some("1"));
  }

  #[test]
  fn internal_priming_precedes_module_env() {
    let config = RuntimeConfig::default();
    let shared = components(&config);

    let ops = shared.ops();
    let internal_at = ops
      .iter()
      .position(|op| matches!(op, Op::SetEnv { key, .. } if key == "ModuleInternalBuild"))
      .unwrap();
    let exec_at = ops.iter().position(|op| matches!(op, Op::Exec { .. })).unwrap();
    assert!(internal_at < exec_at);
    assert!(matches!(ops.last(), Some(Op::UnsetEnv { key }) if key == "ModuleInternalBuild"));
    assert!(!shared.env().contains_key("ModuleName"));
  }

  #[test]
  fn components_are_shared_between_modules() {
    let config = RuntimeConfig::default();
    let a = bootstrap(&config, &ModuleSource::new("/a", "", "A"));
    let b = bootstrap(&config, &ModuleSource::new("/b", "x", "B"));

    let shared = components(&config).ops().len();
    assert_eq!(a.ops()[..shared], b.ops()[..shared]);
  }

  #[test]
  fn bootstrap_mounts_context_owned_by_uid() {
    let config = RuntimeConfig::default();
    let recipe = bootstrap(&config, &module());

    let mount = recipe
      .ops()
      .iter()
      .find_map(|op| match op {
        Op::Mount { path, source, opts } if path == "/Module" => Some((source, opts)),
        _ => None,
      })
      .unwrap();
    assert_eq!(mount.0, &Source::host("/ctx"));
    assert_eq!(mount.1.owner.as_deref(), Some("1654"));
  }

  #[test]
  fn client_image_is_layered_when_configured() {
    let mut config = RuntimeConfig::default();
    config.images.client = Some("client:dev".to_string());

    let primed = bootstrap(&config, &module());
    let compile = compile_recipe(&config, &module(), CompileTarget::SameFolder);
    for recipe in [primed, compile] {
      assert!(recipe.ops().iter().any(|op| matches!(
        op,
        Op::Mount { source, .. } if *source == Source::image("client:dev")
      )));
    }
  }

  #[test]
  fn compile_recipe_uses_sdk_and_deterministic_flags() {
    let config = RuntimeConfig::default();
    let recipe = compile_recipe(&config, &module(), CompileTarget::SubFolder);

    assert!(matches!(&recipe.ops()[0], Op::From { image } if *image == config.images.sdk));
    assert_eq!(recipe.workdir(), "/scratch/dotnet/foo");

    let (args, tolerant) = recipe.last_exec().unwrap();
    assert!(!tolerant);
    assert_eq!(&args[..3], ["dotnet", "build", "Foo"]);
    assert!(args.contains(&"-property:ContinuousIntegrationBuild=true".to_string()));
    assert!(args.contains(&"-maxCpuCount:1".to_string()));
  }

  #[test]
  fn compile_target_arguments() {
    assert_eq!(CompileTarget::SameFolder.argument("Foo"), ".");
    assert_eq!(CompileTarget::SubFolder.argument("Foo"), "Foo");
  }

  #[test]
  fn finalize_sets_invoker_entrypoint() {
    let config = RuntimeConfig::default();
    let primed = bootstrap(&config, &module());
    let done = finalize(&config, &primed);

    assert!(matches!(
      done.ops().last(),
      Some(Op::Entrypoint { args }) if *args == config.commands.invoker
    ));
    assert_eq!(primed.ops().len() + 1, done.ops().len());
  }
}

use anyhow::{Context, Result};

use modprime_lib::config::RuntimeConfig;
use modprime_lib::module::ModuleSource;
use modprime_lib::pipeline::docker::{Target, render};
use modprime_lib::runtime::bootstrap;

use crate::output::symbols;

/// Print the Dockerfile that probes `module`, followed by its build contexts
/// on stderr.
pub fn cmd_render(config: &RuntimeConfig, module: &ModuleSource) -> Result<()> {
  let recipe = bootstrap(config, module);
  let dockerfile = render(&recipe, &Target::Status, &config.docker.status_dir).context("Failed to render recipe")?;

  print!("{}", dockerfile.text);
  for (name, path) in &dockerfile.contexts {
    eprintln!("{} {} {}", name, symbols::ARROW, path.display());
  }
  Ok(())
}

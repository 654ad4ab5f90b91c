use anyhow::{Context, Result};

use modprime_lib::config::{RuntimeConfig, default_config_path};

use crate::output::print_stat;

pub fn cmd_info(config: &RuntimeConfig, verbose: bool) -> Result<()> {
  if verbose {
    eprintln!("Default config: {}", default_config_path().display());
    print_stat("Probe image", &config.probe_image());
    print_stat("Invoker image", &config.invoker_image());
    print_stat("Generator image", &config.generator_image());
    println!();
  }
  print!("{}", config.to_toml().context("Failed to serialize configuration")?);
  Ok(())
}

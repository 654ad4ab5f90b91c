mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modprime_lib::config::RuntimeConfig;
use modprime_lib::module::ModuleSource;

use crate::output::print_error;

/// modprime - discover, compile and invoke modules in layered container builds
#[derive(Parser)]
#[command(name = "modprime")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Configuration file (default: $MODPRIME_CONFIG, then the per-user config)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Where a module lives.
#[derive(Args)]
struct ModuleArgs {
  /// Directory holding the module, mounted into every build
  #[arg(long, default_value = ".")]
  context: PathBuf,

  /// Module location relative to the context directory
  #[arg(long, default_value = "")]
  subpath: String,

  /// Module name
  #[arg(long)]
  name: String,
}

impl ModuleArgs {
  fn resolve(&self) -> Result<ModuleSource> {
    let context = dunce::canonicalize(&self.context)
      .with_context(|| format!("Context directory not found: {}", self.context.display()))?;
    Ok(ModuleSource::new(context, &self.subpath, &self.name))
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Prime a module and print the invocable recipe
  Runtime {
    #[command(flatten)]
    module: ModuleArgs,

    /// Print the recipe as JSON
    #[arg(long)]
    json: bool,
  },

  /// Generate the client for a module from an introspection document
  Codegen {
    #[command(flatten)]
    module: ModuleArgs,

    /// Introspection document produced by the host
    #[arg(long)]
    introspection: PathBuf,

    /// Directory the generated tree is written to
    #[arg(long)]
    out: PathBuf,
  },

  /// Print the Dockerfile of the ready-to-probe recipe without building it
  Render {
    #[command(flatten)]
    module: ModuleArgs,
  },

  /// Run the discovery probe (exits with the discovery code)
  Probe,

  /// Print the effective configuration
  Info,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let config = match RuntimeConfig::load(cli.config.as_deref()).context("Failed to load configuration") {
    Ok(config) => config,
    Err(e) => {
      print_error(&format!("{:#}", e));
      return ExitCode::FAILURE;
    }
  };

  let result = match cli.command {
    Commands::Probe => return cmd::cmd_probe(&config),
    Commands::Runtime { module, json } => module
      .resolve()
      .and_then(|module| cmd::cmd_runtime(&config, &module, cli.verbose, json)),
    Commands::Codegen {
      module,
      introspection,
      out,
    } => module
      .resolve()
      .and_then(|module| cmd::cmd_codegen(&config, &module, &introspection, &out)),
    Commands::Render { module } => module.resolve().and_then(|module| cmd::cmd_render(&config, &module)),
    Commands::Info => cmd::cmd_info(&config, cli.verbose),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

/// Logs go to stderr: stdout carries command output, and the probe's stdout
/// is captured by the build.
fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

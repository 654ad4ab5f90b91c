//! Runtime configuration.
//!
//! Every constant the priming protocol and the code generator depend on
//! (image names, reserved exit codes, env var names, mount points, commands)
//! lives in [`RuntimeConfig`] so tests and alternative registries can swap
//! them without touching the protocol. Missing fields in a TOML file take
//! their defaults.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::CacheConfig;
use crate::consts::{CONFIG_ENV_VAR, CONFIG_FILE_NAME};
use crate::pipeline::docker::DockerConfig;
use crate::platform::paths::config_dir;
use crate::probe::discover::LayoutConfig;
use crate::probe::{PROBE_FAILURE_EXIT, ProbeCodes};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", path.display())]
  Read { path: PathBuf, source: io::Error },

  #[error("failed to parse config {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    source: toml::de::Error,
  },

  #[error("failed to serialize config: {0}")]
  Serialize(#[from] toml::ser::Error),

  #[error("invalid config: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  /// Version of the runtime components (probe, invoker, generator images).
  pub version: String,
  /// Client library version that generated projects are pinned to.
  pub release_version: String,
  /// Registry prefix for component images, including the trailing `/`.
  pub registry: String,
  /// Unprivileged user that owns mounts and runs compile steps.
  pub uid: String,
  /// Environment applied to every base recipe.
  pub base_env: BTreeMap<String, String>,
  pub images: ImageConfig,
  pub exit_codes: ProbeCodes,
  pub env: EnvNames,
  pub paths: PathConfig,
  pub commands: CommandConfig,
  pub compiler: CompilerConfig,
  pub cache: CacheConfig,
  pub layout: LayoutConfig,
  pub codegen: CodegenConfig,
  pub docker: DockerConfig,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      version: env!("CARGO_PKG_VERSION").to_string(),
      release_version: "0.15.2.0".to_string(),
      registry: "ghcr.io/modprime/".to_string(),
      uid: "1654".to_string(),
      base_env: BTreeMap::from([("DOTNET_CLI_TELEMETRY_OPTOUT".to_string(), "1".to_string())]),
      images: ImageConfig::default(),
      exit_codes: ProbeCodes::default(),
      env: EnvNames::default(),
      paths: PathConfig::default(),
      commands: CommandConfig::default(),
      compiler: CompilerConfig::default(),
      cache: CacheConfig::default(),
      layout: LayoutConfig::default(),
      codegen: CodegenConfig::default(),
      docker: DockerConfig::default(),
    }
  }
}

/// Base and component images. Component images left unset resolve to
/// `<registry>modprime-<component>:<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
  pub runtime: String,
  pub sdk: String,
  pub probe: Option<String>,
  pub invoker: Option<String>,
  pub generator: Option<String>,
  /// Development build of the client library layered over the module.
  pub client: Option<String>,
}

impl Default for ImageConfig {
  fn default() -> Self {
    Self {
      runtime: "mcr.microsoft.com/dotnet/runtime:8.0-noble".to_string(),
      sdk: "mcr.microsoft.com/dotnet/sdk:8.0-noble".to_string(),
      probe: None,
      invoker: None,
      generator: None,
      client: None,
    }
  }
}

/// Names of the discovery environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvNames {
  pub module_name: String,
  pub source_path: String,
  /// Set only while priming the runtime's own components.
  pub internal: String,
  pub prefer_release: String,
}

impl Default for EnvNames {
  fn default() -> Self {
    Self {
      module_name: "ModuleName".to_string(),
      source_path: "ModuleSourcePath".to_string(),
      internal: "ModuleInternalBuild".to_string(),
      prefer_release: "ModulePreferRelease".to_string(),
    }
  }
}

/// Mount points and well-known paths inside recipes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
  pub module: String,
  pub probe: String,
  pub invoker: String,
  pub generator: String,
  pub workdir: String,
  pub introspection: String,
  pub tmp: String,
  /// Directory the probe records the assembly path and dependencies in.
  pub probe_state: String,
  /// Where the probe restores package dependencies for the invoker.
  pub module_deps: String,
}

impl Default for PathConfig {
  fn default() -> Self {
    Self {
      module: "/Module".to_string(),
      probe: "/Probe".to_string(),
      invoker: "/Invoker".to_string(),
      generator: "/CodeGenerator".to_string(),
      workdir: "/scratch".to_string(),
      introspection: "/mnt/introspection.json".to_string(),
      tmp: "/tmp".to_string(),
      probe_state: "/etc/modprime".to_string(),
      module_deps: "/module-deps".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
  pub probe: Vec<String>,
  pub invoker: Vec<String>,
  pub generator: Vec<String>,
}

impl Default for CommandConfig {
  fn default() -> Self {
    Self {
      probe: strings(&["/Probe/modprime", "probe"]),
      invoker: strings(&["/usr/bin/dotnet", "/Invoker/Invoker.dll"]),
      generator: strings(&["/usr/bin/dotnet", "/CodeGenerator/CodeGenerator.dll"]),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
  pub command: Vec<String>,
  /// Appended after the target. Together they make builds reproducible and
  /// non-interactive with a single worker.
  pub flags: Vec<String>,
  /// Commands run once in the SDK image before compiling.
  pub setup: Vec<Vec<String>>,
}

impl Default for CompilerConfig {
  fn default() -> Self {
    Self {
      command: strings(&["dotnet", "build"]),
      flags: strings(&[
        "--nologo",
        "--os=linux",
        "-property:ContinuousIntegrationBuild=true",
        "-maxCpuCount:1",
      ]),
      setup: vec![strings(&["dotnet", "workload", "update"])],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
  /// Directory holding the project template and support file. Without it,
  /// `<data_dir>/templates` is used when present, else the built-in templates.
  pub templates_dir: Option<PathBuf>,
  pub project_template: String,
  pub support_file: String,
  /// Replaced verbatim with the module name in the template.
  pub placeholder: String,
  /// Text immediately preceding the quoted client version in project files.
  pub version_marker: String,
  /// Keep generated client sources in a sibling of the module project.
  pub split_layout: bool,
  pub libraries_dir: String,
  /// Globs kept out of version control in addition to debug symbols and
  /// build output, which are always ignored.
  pub vcs_ignored: Vec<String>,
}

impl Default for CodegenConfig {
  fn default() -> Self {
    Self {
      templates_dir: None,
      project_template: "Template.csproj".to_string(),
      support_file: "Module.cs".to_string(),
      placeholder: "$".to_string(),
      version_marker: r#"<PackageReference Include="Modprime.Client" Version=""#.to_string(),
      split_layout: false,
      libraries_dir: "Libraries".to_string(),
      vcs_ignored: Vec::new(),
    }
  }
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl RuntimeConfig {
  pub fn probe_image(&self) -> String {
    self.component_image(&self.images.probe, "probe")
  }

  pub fn invoker_image(&self) -> String {
    self.component_image(&self.images.invoker, "invoker")
  }

  pub fn generator_image(&self) -> String {
    self.component_image(&self.images.generator, "generator")
  }

  fn component_image(&self, explicit: &Option<String>, component: &str) -> String {
    explicit
      .clone()
      .unwrap_or_else(|| format!("{}modprime-{}:{}", self.registry, component, self.version))
  }

  /// Reject configurations that would break the discovery contract or
  /// produce unrunnable recipes.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let codes = [
      ("not_found", self.exit_codes.not_found),
      ("same_folder", self.exit_codes.same_folder),
      ("sub_folder", self.exit_codes.sub_folder),
    ];
    for (name, code) in codes {
      if !(1..=255).contains(&code) {
        return Err(ConfigError::Invalid(format!(
          "exit_codes.{} must be within 1..=255, got {}",
          name, code
        )));
      }
      if code == PROBE_FAILURE_EXIT {
        return Err(ConfigError::Invalid(format!(
          "exit_codes.{} must not be {}, which the probe uses for its own failures",
          name, PROBE_FAILURE_EXIT
        )));
      }
    }
    for (i, (a, x)) in codes.iter().enumerate() {
      for (b, y) in &codes[i + 1..] {
        if x == y {
          return Err(ConfigError::Invalid(format!(
            "exit_codes.{} and exit_codes.{} are both {}",
            a, b, x
          )));
        }
      }
    }

    let commands = [
      ("commands.probe", &self.commands.probe),
      ("commands.invoker", &self.commands.invoker),
      ("commands.generator", &self.commands.generator),
      ("compiler.command", &self.compiler.command),
    ];
    for (name, command) in commands {
      if command.first().is_none_or(|c| c.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!("{} must be a non-empty array", name)));
      }
    }

    let names = [
      ("env.module_name", &self.env.module_name),
      ("env.source_path", &self.env.source_path),
      ("env.internal", &self.env.internal),
      ("env.prefer_release", &self.env.prefer_release),
    ];
    for (field, value) in names {
      if !is_shell_identifier(value) {
        return Err(ConfigError::Invalid(format!(
          "{} must be a shell identifier, got {:?}",
          field, value
        )));
      }
    }

    if self.codegen.placeholder.is_empty() {
      return Err(ConfigError::Invalid("codegen.placeholder must not be empty".to_string()));
    }
    if self.codegen.version_marker.is_empty() {
      return Err(ConfigError::Invalid("codegen.version_marker must not be empty".to_string()));
    }

    Ok(())
  }

  /// Read, parse and validate a TOML config file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;
    let config: RuntimeConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      source: e,
    })?;
    config.validate()?;
    Ok(config)
  }

  /// Resolve the effective configuration.
  ///
  /// An explicit path or `$MODPRIME_CONFIG` must exist. The per-user default
  /// file is optional; without it the built-in defaults apply.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      debug!(path = %path.display(), "loading config");
      return Self::from_file(path);
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
      let path = PathBuf::from(path);
      debug!(path = %path.display(), "loading config from {}", CONFIG_ENV_VAR);
      return Self::from_file(&path);
    }

    let path = default_config_path();
    if path.is_file() {
      debug!(path = %path.display(), "loading config");
      return Self::from_file(&path);
    }

    let config = Self::default();
    config.validate()?;
    Ok(config)
  }

  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }
}

pub fn default_config_path() -> PathBuf {
  config_dir().join(CONFIG_FILE_NAME)
}

fn is_shell_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
    _ => false,
  }
}

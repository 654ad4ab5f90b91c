//! The discovery probe.
//!
//! The probe runs inside an isolated container step and inspects a mounted
//! module directory. Its *only* channel back to the priming protocol is its
//! process exit code:
//!
//! | code                      | outcome                                   |
//! |---------------------------|-------------------------------------------|
//! | `0`                       | [`ProbeOutcome::Ready`]                   |
//! | `ProbeCodes::not_found`   | [`ProbeOutcome::NotFound`]                |
//! | `ProbeCodes::same_folder` | [`ProbeOutcome::FoundSameFolder`]         |
//! | `ProbeCodes::sub_folder`  | [`ProbeOutcome::FoundSubFolder`]          |
//! | anything else             | [`ProbeOutcome::OtherFailure`] (fatal)    |
//!
//! Adding an outcome means reserving a new code on both sides at once.
//!
//! # Submodules
//!
//! - [`discover`] - Assembly and project file discovery
//! - [`deps`] - Dependency manifest extraction from `.deps.json` files

pub mod deps;
pub mod discover;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use discover::{Discovery, ProbePreferences};

/// Exit status the probe uses for its own failures (bad environment, I/O).
/// It is never a reserved code, so the protocol classifies it as
/// [`ProbeOutcome::OtherFailure`].
pub const PROBE_FAILURE_EXIT: i32 = 1;

/// File names written into the probe state directory.
pub const ASSEMBLY_PATH_FILE: &str = "assembly-path";
pub const DEPENDENCIES_FILE: &str = "dependencies";
pub const INTERNAL_DEPENDENCIES_FILE: &str = "internal-dependencies";

/// The reserved, non-zero exit codes of the discovery contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCodes {
  pub not_found: i32,
  pub same_folder: i32,
  pub sub_folder: i32,
}

impl Default for ProbeCodes {
  fn default() -> Self {
    Self {
      not_found: 120,
      same_folder: 121,
      sub_folder: 122,
    }
  }
}

/// The decoded result of one probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeOutcome {
  /// A compiled assembly is present and discoverable.
  Ready,
  /// Neither an assembly nor a project file was found.
  NotFound,
  /// A project file sits directly at the source path.
  FoundSameFolder,
  /// A project file sits in a subfolder named after the module.
  FoundSubFolder,
  /// Any other exit code. Always fatal.
  OtherFailure(i32),
}

impl ProbeOutcome {
  /// Decode an exit code. Exactly one outcome is selected for every code.
  pub fn decode(code: i32, codes: &ProbeCodes) -> Self {
    match code {
      0 => ProbeOutcome::Ready,
      c if c == codes.not_found => ProbeOutcome::NotFound,
      c if c == codes.same_folder => ProbeOutcome::FoundSameFolder,
      c if c == codes.sub_folder => ProbeOutcome::FoundSubFolder,
      other => ProbeOutcome::OtherFailure(other),
    }
  }

  /// The exit code that encodes this outcome.
  pub fn exit_code(&self, codes: &ProbeCodes) -> i32 {
    match self {
      ProbeOutcome::Ready => 0,
      ProbeOutcome::NotFound => codes.not_found,
      ProbeOutcome::FoundSameFolder => codes.same_folder,
      ProbeOutcome::FoundSubFolder => codes.sub_folder,
      ProbeOutcome::OtherFailure(code) => *code,
    }
  }
}

impl std::fmt::Display for ProbeOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ProbeOutcome::Ready => write!(f, "ready"),
      ProbeOutcome::NotFound => write!(f, "not found"),
      ProbeOutcome::FoundSameFolder => write!(f, "project in source folder"),
      ProbeOutcome::FoundSubFolder => write!(f, "project in module subfolder"),
      ProbeOutcome::OtherFailure(code) => write!(f, "unrecognised exit code {}", code),
    }
  }
}

/// Errors raised by the probe program itself.
#[derive(Debug, Error)]
pub enum ProbeError {
  #[error("environment variable {0} is not set")]
  MissingEnv(String),

  #[error("failed to read {}: {source}", path.display())]
  Read { path: PathBuf, source: io::Error },

  #[error("failed to parse dependency manifest {}: {source}", path.display())]
  Deps {
    path: PathBuf,
    source: serde_json::Error,
  },

  #[error("failed to write {}: {source}", path.display())]
  Write { path: PathBuf, source: io::Error },
}

/// What the probe was asked to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
  /// Module name. Not required while priming internal components.
  pub module_name: Option<String>,
  pub source_path: PathBuf,
  /// Set while priming the runtime's own components rather than a user module.
  pub internal: bool,
  pub prefer_release: Option<bool>,
}

impl ProbeRequest {
  /// Build a request from the discovery environment variables named in
  /// `config.env`.
  pub fn from_env(config: &RuntimeConfig) -> Result<Self, ProbeError> {
    let names = &config.env;
    let internal = std::env::var_os(&names.internal).is_some();
    let module_name = std::env::var(&names.module_name).ok().filter(|n| !n.is_empty());
    let source_path = std::env::var(&names.source_path)
      .map(PathBuf::from)
      .map_err(|_| ProbeError::MissingEnv(names.source_path.clone()))?;

    if !internal && module_name.is_none() {
      return Err(ProbeError::MissingEnv(names.module_name.clone()));
    }

    let prefer_release = std::env::var(&names.prefer_release)
      .ok()
      .and_then(|v| discover::parse_preference(&v));

    Ok(Self {
      module_name,
      source_path,
      internal,
      prefer_release,
    })
  }
}

/// What one probe run found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
  pub outcome: ProbeOutcome,
  pub assembly: Option<PathBuf>,
  pub dependencies: Vec<String>,
  /// Dependencies restored from the package store.
  pub restored: Vec<String>,
}

impl ProbeReport {
  fn without_assembly(outcome: ProbeOutcome) -> Self {
    Self {
      outcome,
      assembly: None,
      dependencies: Vec::new(),
      restored: Vec::new(),
    }
  }
}

/// Run the probe: discover the module layout and, when an assembly is found,
/// record its path and dependencies under `state_dir` and restore those
/// dependencies from the package store.
pub fn run(request: &ProbeRequest, config: &RuntimeConfig, state_dir: &Path) -> Result<ProbeReport, ProbeError> {
  if request.internal {
    let dependencies = deps::collect_dir(&request.source_path, &config.layout)?;
    write_lines(&state_dir.join(INTERNAL_DEPENDENCIES_FILE), &dependencies)?;
    let restored = restore(&dependencies, config)?;
    info!(
      source = %request.source_path.display(),
      count = dependencies.len(),
      restored = restored.len(),
      "primed internal component"
    );
    return Ok(ProbeReport {
      dependencies,
      restored,
      ..ProbeReport::without_assembly(ProbeOutcome::Ready)
    });
  }

  let name = request
    .module_name
    .as_deref()
    .ok_or_else(|| ProbeError::MissingEnv(config.env.module_name.clone()))?;

  let prefs = ProbePreferences::detect(&config.layout, request.prefer_release);
  let discovery = discover::discover(name, &request.source_path, &config.layout, &prefs)?;
  debug!(module = %name, discovery = ?discovery, "discovery finished");

  let report = match discovery {
    Discovery::Assembly(path) => {
      let dependencies = deps::collect_for_assembly(&path, &config.layout)?;
      write_file(
        &state_dir.join(ASSEMBLY_PATH_FILE),
        path.to_string_lossy().as_bytes(),
      )?;
      write_lines(&state_dir.join(DEPENDENCIES_FILE), &dependencies)?;
      let restored = restore(&dependencies, config)?;
      info!(
        module = %name,
        assembly = %path.display(),
        restored = restored.len(),
        "module is ready"
      );
      ProbeReport {
        outcome: ProbeOutcome::Ready,
        assembly: Some(path),
        dependencies,
        restored,
      }
    }
    Discovery::ProjectSameFolder => ProbeReport::without_assembly(ProbeOutcome::FoundSameFolder),
    Discovery::ProjectSubFolder => ProbeReport::without_assembly(ProbeOutcome::FoundSubFolder),
    Discovery::NotFound => ProbeReport::without_assembly(ProbeOutcome::NotFound),
  };

  Ok(report)
}

fn restore(dependencies: &[String], config: &RuntimeConfig) -> Result<Vec<String>, ProbeError> {
  let packages = Path::new(&config.cache.packages.mount);
  let dest = Path::new(&config.paths.module_deps);
  Ok(deps::restore(dependencies, packages, dest)?.restored)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), ProbeError> {
  let mut body = lines.join("\n");
  if !body.is_empty() {
    body.push('\n');
  }
  write_file(path, body.as_bytes())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ProbeError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| ProbeError::Write {
      path: parent.to_path_buf(),
      source: e,
    })?;
  }
  fs::write(path, contents).map_err(|e| ProbeError::Write {
    path: path.to_path_buf(),
    source: e,
  })
}
